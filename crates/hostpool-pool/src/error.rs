//! Pool error types and the caller-facing error taxonomy.

use std::fmt;

use hostpool_allocator::AllocError;
use hostpool_core::ContextError;
use hostpool_state::StateError;
use hostpool_verify::{Stage, VerifyError};
use serde::Serialize;
use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

/// Coarse class of a [`PoolError`], for callers that branch on the kind of
/// failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    /// Lost a race with a concurrent mutation.
    Conflict,
    Capacity,
    Connectivity,
    Verification,
    Permission,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Verification => "verification",
            ErrorKind::Permission => "permission",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("host {0} was modified concurrently, retry the call")]
    Conflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Cancelled(#[from] ContextError),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StateError> for PoolError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => PoolError::NotFound(what),
            StateError::AlreadyExists(what) => {
                PoolError::Validation(format!("{what} already exists"))
            }
            StateError::Invalid(msg) => PoolError::Validation(msg),
            StateError::Conflict(host_id) => PoolError::Conflict(host_id),
            StateError::InUse(host_id) => {
                PoolError::Permission(format!("host {host_id} is still in use"))
            }
            other => PoolError::State(other),
        }
    }
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Validation(_) => ErrorKind::Validation,
            PoolError::NotFound(_) => ErrorKind::NotFound,
            PoolError::Conflict(_) => ErrorKind::Conflict,
            PoolError::Permission(_) => ErrorKind::Permission,
            PoolError::Alloc(e) => match e {
                AllocError::Validation(_) => ErrorKind::Validation,
                AllocError::NotFound(_) => ErrorKind::NotFound,
                AllocError::Capacity { .. } => ErrorKind::Capacity,
                AllocError::Conflict(_) => ErrorKind::Conflict,
                AllocError::Cancelled(_) => ErrorKind::Cancelled,
                AllocError::State(_) | AllocError::Internal(_) => ErrorKind::Internal,
            },
            PoolError::Verify(e) => match e {
                VerifyError::Connectivity { .. } => ErrorKind::Connectivity,
                VerifyError::Check { .. } => ErrorKind::Verification,
                VerifyError::Interrupted { .. } => ErrorKind::Cancelled,
            },
            PoolError::Cancelled(_) => ErrorKind::Cancelled,
            PoolError::State(_) | PoolError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only lost races are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Verification stage that failed, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PoolError::Verify(e) => Some(e.stage()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_kinds() {
        let cases = [
            (StateError::NotFound("host h1".into()), ErrorKind::NotFound),
            (StateError::AlreadyExists("host h1".into()), ErrorKind::Validation),
            (StateError::Conflict("h1".into()), ErrorKind::Conflict),
            (StateError::InUse("h1".into()), ErrorKind::Permission),
            (StateError::Write("disk full".into()), ErrorKind::Internal),
        ];
        for (state, kind) in cases {
            assert_eq!(PoolError::from(state).kind(), kind);
        }
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(PoolError::from(AllocError::Conflict("h1".into())).is_retryable());
        let capacity = PoolError::from(AllocError::Capacity {
            batch: 0,
            requirement: 1,
            reason: "insufficient compute: 2".into(),
        });
        assert_eq!(capacity.kind(), ErrorKind::Capacity);
        assert!(!capacity.is_retryable());
        assert!(capacity.to_string().contains("batch 0 requirement 1"));
    }

    #[test]
    fn verification_errors_carry_stage() {
        let e = PoolError::from(VerifyError::Check {
            host: "10.0.0.1".into(),
            stage: Stage::Swap,
            reason: "swap must be off, found 2047 MB".into(),
        });
        assert_eq!(e.kind(), ErrorKind::Verification);
        assert_eq!(e.stage(), Some(Stage::Swap));
        assert!(e.to_string().contains("swap check failed"));
    }

    #[test]
    fn cancellation_is_its_own_kind() {
        assert_eq!(PoolError::from(ContextError::DeadlineExceeded).kind(), ErrorKind::Cancelled);
        assert_eq!(
            PoolError::from(AllocError::Cancelled(ContextError::Cancelled)).kind(),
            ErrorKind::Cancelled
        );
    }
}
