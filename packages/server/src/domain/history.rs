//! History store trait.
//!
//! Append-only message log keyed by group id. Concrete implementations live in
//! the infrastructure layer.

use async_trait::async_trait;

use super::{error::HistoryError, value_object::GroupId};

/// Per-group ordered message log consulted by the hub.
///
/// The hub treats every error as non-fatal: a failed append leaves the message
/// delivered but unpersisted, a failed read skips the replay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a serialized payload to the group's log
    async fn append(&self, group_id: &GroupId, payload: &str) -> Result<(), HistoryError>;

    /// Read the group's whole log in insertion order
    async fn read_all(&self, group_id: &GroupId) -> Result<Vec<String>, HistoryError>;
}
