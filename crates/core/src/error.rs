//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures raised by the batch model itself (bad parameters,
/// context values that cannot be serialized, misuse of an entity). Storage and
/// launch failures have their own error types in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Job parameters were rejected by a validator.
    #[error("invalid job parameters: {0}")]
    InvalidParameters(String),

    /// A context value could not be converted to or from JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An entity was used in a state that does not allow the operation.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl DomainError {
    pub fn invalid_parameters(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}
