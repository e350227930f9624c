//! Error model shared by the model facade and drivers.

use thiserror::Error;

/// Result type used across the model layer.
pub type ModelResult<T> = Result<T, ModelError>;

/// Storage backend failure.
///
/// Drivers classify their native errors into these kinds where they can; anything
/// else goes into `Backend` with the driver's own message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The backend could not be reached (pool exhausted, socket closed, ...).
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend rejected a write (unique key, foreign key, check).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The backend did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A stored document could not be mapped back into the entity type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Internal lock poisoning in an in-process driver.
    #[error("driver state poisoned")]
    Poisoned,

    /// Unclassified backend failure, passed through opaquely.
    #[error("backend error: {0}")]
    Backend(String),
}

impl DriverError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// No identity is left to generate for `collection`.
    pub fn identity_exhausted(collection: &str) -> Self {
        Self::Constraint(format!("{collection}: identity space exhausted"))
    }
}

/// One rejected rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Attribute the rule is attached to.
    pub attribute: String,
    /// Rule identity (constraint name, e.g. `"min"` or a custom predicate name).
    pub rule: String,
    pub message: String,
}

impl core::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {} ({})", self.attribute, self.message, self.rule)
    }
}

/// Every failure produced by one validation pass, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    failures: Vec<ValidationFailure>,
}

impl ValidationErrors {
    pub fn new(failures: Vec<ValidationFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures attached to `attribute`.
    pub fn for_attribute<'a>(
        &'a self,
        attribute: &'a str,
    ) -> impl Iterator<Item = &'a ValidationFailure> + 'a {
        self.failures.iter().filter(move |f| f.attribute == attribute)
    }

    pub fn into_failures(self) -> Vec<ValidationFailure> {
        self.failures
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        for failure in &self.failures {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Model-facade error.
///
/// `NotFound` and `Validation` are produced by the facade itself; `Driver` is a
/// backend failure forwarded unchanged so callers can tell the kinds apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The addressed record does not exist.
    #[error("{collection} record not found: {id}")]
    NotFound { collection: &'static str, id: String },

    /// Registered rules rejected the candidate entity.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The storage backend failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The entity could not be viewed as an attribute map.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A filter mapping could not be turned into a query descriptor.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl ModelError {
    pub fn not_found(collection: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

impl From<ValidationErrors> for ModelError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
