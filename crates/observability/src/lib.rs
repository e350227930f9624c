//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::Format::Json);
}

/// Human-readable variant for local development and test runs.
pub fn init_compact() {
    tracing::init(tracing::Format::Compact);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
