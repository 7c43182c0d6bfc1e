//! Allocator error types.

use hostpool_core::ContextError;
use hostpool_state::StateError;
use thiserror::Error;

/// Errors that can occur during allocation or recycling.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A requirement could not be satisfied. Nothing was reserved.
    #[error("batch {batch} requirement {requirement}: {reason}")]
    Capacity {
        batch: usize,
        requirement: usize,
        reason: String,
    },

    /// A host changed between planning and commit. Safe to retry.
    #[error("host {0} was modified concurrently, retry the call")]
    Conflict(String),

    #[error(transparent)]
    Cancelled(#[from] ContextError),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StateError> for AllocError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(host_id) => AllocError::Conflict(host_id),
            StateError::NotFound(what) => AllocError::NotFound(what),
            StateError::Invalid(msg) => AllocError::Validation(msg),
            other => AllocError::State(other),
        }
    }
}

pub type AllocResult<T> = Result<T, AllocError>;
