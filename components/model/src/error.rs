use std::time::Duration;

use thiserror::Error;

use crate::{query::QueryId, replica::ReplicaId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Replica {replica} acknowledged segment {segment} which is not in flight for it")]
    ProtocolViolation { replica: ReplicaId, segment: u64 },

    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("No replica answered within {0:?}")]
    ReplicaTimeout(Duration),

    #[error("All {0} participating replicas failed before every segment was read")]
    ReplicasExhausted(usize),

    #[error("Replica {0} is excluded from the query")]
    ReplicaExcluded(ReplicaId),

    #[error("Replica {0} has not registered")]
    UnknownReplica(ReplicaId),

    #[error("Reading state is not initialized yet")]
    NotAnnounced,

    #[error("Reading state is already initialized")]
    AlreadyInitialized,

    #[error("Query `{0}` was cancelled")]
    Cancelled(QueryId),

    #[error("Query `{0}` is already running")]
    DuplicateQuery(QueryId),

    #[error("Query `{0}` is not found")]
    QueryNotFound(QueryId),

    #[error("Internal error: `{0}`")]
    Internal(String),
}

impl CoordinationError {
    /// Whether the error stems from replicas failing to answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CoordinationError::ReplicaTimeout(_) | CoordinationError::ReplicasExhausted(_)
        )
    }

    pub fn unexpected<Msg>(message: Msg) -> Self
    where
        Msg: AsRef<str>,
    {
        CoordinationError::Internal(message.as_ref().to_owned())
    }
}
