//! `stratum-model`: the typed, driver-agnostic model facade.
//!
//! - `driver`: the capability set a storage backend implements
//! - `query`: immutable query descriptors built by `filter`/`find`
//! - `handle`: lazy collection / unique / raw result handles
//! - `model`: `Model<T, D>`, the CRUD + query + validation entry point

pub mod driver;
pub mod handle;
pub mod model;
pub mod query;
pub mod sequencer;

pub use driver::{BoxCursor, Cursor, Driver, RawTarget};
pub use handle::{Collection, Finder, HandleStatus, Raw, Unique};
pub use model::Model;
pub use query::{Comparison, Direction, Order, Predicate, QueryDescriptor, QueryError};
pub use sequencer::{SequencedWrite, WriteSequencer, WriteTicket};

pub use stratum_core::{
    Attrs, Constraint, DriverError, Entity, Identity, ModelError, ModelResult, Rule, Severity,
    ValidationErrors, ValidationFailure, ValidationRegistry, ValidationReport, ValueKind,
};
