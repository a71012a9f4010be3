//! Scheduler error types.

use thiserror::Error;

use fleetgrid_state::StateError;

use crate::rpc::RpcError;

/// Errors that can occur during scheduling and migration validation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A referenced instance, service or volume record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A precondition of the requested operation does not hold.
    #[error("invalid: {0}")]
    Invalid(String),

    /// The destination lacks memory headroom for the instance.
    #[error(
        "{instance} is not capable to migrate to {host} \
         (host: {available_mb}MB <= instance: {requested_mb}MB)"
    )]
    InsufficientCapacity {
        instance: String,
        host: String,
        available_mb: u64,
        requested_mb: u64,
    },

    /// An agent call failed: transport trouble or a remote-side error.
    #[error("remote failure: {0}")]
    Remote(#[from] RpcError),

    /// Another validation for the same instance has not finished yet.
    #[error("migration validation already in progress for instance {0}")]
    InProgress(String),

    #[error("no valid host for topic {0}")]
    NoValidHost(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for SchedulerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound { kind, id } => SchedulerError::NotFound(format!("{kind} {id}")),
            StateError::Conflict { kind, id, reason } => {
                SchedulerError::Invalid(format!("{kind} {id} changed during validation: {reason}"))
            }
            other => SchedulerError::State(other),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
