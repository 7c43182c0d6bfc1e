//! Error types for the hostpool inventory store.

use thiserror::Error;

/// Result type alias for inventory store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during inventory store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid value: {0}")]
    Invalid(String),

    /// A host changed between the read and the commit of a mutation.
    #[error("host {0} was modified concurrently")]
    Conflict(String),

    /// A host still has active reservation records.
    #[error("host {0} is still in use")]
    InUse(String),
}
