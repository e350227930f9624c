//! Infrastructure layer: concrete storage drivers for `stratum-model`.

pub mod driver;

mod integration_tests;

pub use driver::{DriverStats, InMemoryDriver};
#[cfg(feature = "postgres")]
pub use driver::PostgresDriver;
