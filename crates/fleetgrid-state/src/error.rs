//! Error types for the FleetGrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
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

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The stored record no longer matches the caller's expected version.
    #[error("{kind} {id} changed concurrently: {reason}")]
    Conflict {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

impl StateError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StateError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
