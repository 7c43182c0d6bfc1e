use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    /// The requirement itself is malformed (missing location, bad count).
    #[error("invalid requirement: {0}")]
    Invalid(String),

    /// Not enough eligible hosts.
    #[error("need {wanted} host(s), {found} eligible: {reason}")]
    Insufficient {
        wanted: u32,
        found: usize,
        reason: String,
    },
}
