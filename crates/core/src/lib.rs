//! `stratum-core`: storage-agnostic building blocks for typed models.
//!
//! This crate contains **pure** primitives (no driver or I/O concerns): the
//! entity contract, identity generation, validation rules and the error
//! taxonomy shared by the model facade and every driver.

pub mod entity;
pub mod error;
pub mod id;
pub mod validation;

pub use entity::{Entity, attributes, attribute};
pub use error::{DriverError, ModelError, ModelResult, ValidationErrors, ValidationFailure};
pub use id::Identity;
pub use validation::{
    Attrs, Constraint, Rule, Severity, ValidationRegistry, ValidationReport, ValueKind,
};
