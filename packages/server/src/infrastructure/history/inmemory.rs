//! In-memory history store.
//!
//! Keeps every group's log in a `HashMap`. Nothing is persisted across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{GroupId, HistoryError, HistoryStore};

/// Process-local implementation of [`HistoryStore`]
pub struct InMemoryHistoryStore {
    logs: Mutex<HashMap<GroupId, Vec<String>>>,
    /// Maximum entries kept per group, unbounded when `None`
    capacity: Option<usize>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Create a store that rejects appends once a group holds `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, group_id: &GroupId, payload: &str) -> Result<(), HistoryError> {
        let mut logs = self.logs.lock().await;
        let log = logs.entry(group_id.clone()).or_default();

        if let Some(capacity) = self.capacity
            && log.len() >= capacity
        {
            return Err(HistoryError::CapacityExceeded {
                group: group_id.as_str().to_string(),
                capacity,
            });
        }

        log.push(payload.to_string());
        Ok(())
    }

    async fn read_all(&self, group_id: &GroupId) -> Result<Vec<String>, HistoryError> {
        let logs = self.logs.lock().await;
        Ok(logs.get(group_id).cloned().unwrap_or_default())
    }
}
