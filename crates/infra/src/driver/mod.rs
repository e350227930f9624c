//! Storage drivers implementing the `stratum_model::Driver` capability set.
//!
//! - `in_memory`: process-local, snapshot-per-query driver for tests/dev
//! - `postgres` (feature `postgres`): JSONB document store over a SQLx pool

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::{DriverStats, InMemoryDriver};
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
