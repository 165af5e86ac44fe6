//! Domain error types.

use thiserror::Error;

use super::value_object::ConnectionId;

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("Group id must not be empty")]
    GroupIdEmpty,
}

/// Errors raised while decoding an inbound frame into an [`Envelope`](super::Envelope)
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Frame is not a valid JSON envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown envelope type '{0}'")]
    UnknownType(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid group id: {0}")]
    InvalidGroup(#[from] ValueObjectError),
}

/// Hub membership errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The connection was evicted or never attached
    #[error("Connection {0} is not attached to the hub")]
    Detached(ConnectionId),
}

/// History store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("History backend error: {0}")]
    Backend(String),

    #[error("History for group '{group}' is full (capacity {capacity})")]
    CapacityExceeded { group: String, capacity: usize },
}

/// Fan-out dispatcher errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Fan-out workers have stopped")]
    Stopped,
}
