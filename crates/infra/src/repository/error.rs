//! Errors raised by the execution stores.

use thiserror::Error;

/// Store operation error.
///
/// `OptimisticLock` is the only error a well-behaved caller is expected to
/// recover from: re-read the record, re-apply its change, and update again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(
        "optimistic locking failure: {entity} id={id} updated with version {attempted}, current version is {current}"
    )]
    OptimisticLock {
        entity: &'static str,
        id: u64,
        attempted: u64,
        current: u64,
    },

    #[error("{entity} id={id} must be saved before it can be updated")]
    NotSaved { entity: &'static str, id: u64 },

    #[error("{entity} is already saved (id={id})")]
    AlreadySaved { entity: &'static str, id: u64 },

    #[error("{0} has no id; it must be saved first")]
    MissingId(&'static str),

    #[error("job instance already exists: {0}")]
    InstanceExists(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, StoreError::OptimisticLock { .. })
    }
}
