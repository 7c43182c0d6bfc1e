//! Verification error types.

use hostpool_core::ContextError;
use thiserror::Error;

use crate::pipeline::Stage;

pub type VerifyResult<T> = Result<T, VerifyError>;

#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    /// The session could not be opened or was lost.
    #[error("host {host}: {stage} failed: {reason}")]
    Connectivity {
        host: String,
        stage: Stage,
        reason: String,
    },

    /// The host answered but does not meet the requirement.
    #[error("host {host}: {stage} check failed: {reason}")]
    Check {
        host: String,
        stage: Stage,
        reason: String,
    },

    #[error("host {host}: verification stopped at {stage}: {source}")]
    Interrupted {
        host: String,
        stage: Stage,
        #[source]
        source: ContextError,
    },
}

impl VerifyError {
    pub fn stage(&self) -> Stage {
        match self {
            VerifyError::Connectivity { stage, .. }
            | VerifyError::Check { stage, .. }
            | VerifyError::Interrupted { stage, .. } => *stage,
        }
    }
}
