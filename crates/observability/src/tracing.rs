//! Tracing/logging initialization.
//!
//! Filtering follows `RUST_LOG` (default `info`). Model and driver operations log
//! at `debug`, validation rejections at `warn`.

use tracing_subscriber::EnvFilter;

/// Output format of the process subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    /// JSON lines with timestamps.
    Json,
    Compact,
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: Format) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match format {
        Format::Json => builder.json().with_target(false).try_init(),
        Format::Compact => builder.compact().try_init(),
    };
}
