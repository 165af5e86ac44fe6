//! Group registry and fan-out engine.
//!
//! The [`Hub`] owns which connection belongs to which group and delivers
//! envelopes to every member's bounded outbound queue. A member whose queue
//! stays full longer than [`HubConfig::enqueue_timeout`] is treated as dead and
//! evicted, so one slow consumer cannot stall a group for longer than that.

mod config;
mod dispatcher;
mod registry;

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock, mpsc};

use crate::domain::{ConnectionId, Envelope, GroupId, HistoryStore, HubError, Membership};
use huddle_shared::time::now_millis;

pub use config::{
    DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_FANOUT_BACKLOG, DEFAULT_FANOUT_WORKERS,
    DEFAULT_QUEUE_CAPACITY, FanoutConfig, HubConfig,
};
pub use dispatcher::{Dispatcher, FanoutJob};
pub use registry::{Departure, GroupSummary, MemberSummary, Outbound};

use registry::Registry;

/// Last payload appended to one group's history
type LastAppended = Arc<Mutex<Option<String>>>;

/// Outcome of a single enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Delivered,
    TimedOut,
    Closed,
}

/// What one [`Hub::broadcast`] call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Members whose queue accepted the envelope
    pub delivered: Vec<ConnectionId>,
    /// Members evicted because their queue was full or closed
    pub evicted: Vec<ConnectionId>,
    /// Whether the payload was appended to the group's history
    pub persisted: bool,
}

/// What one [`Hub::replay_history`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Replay frame with this many entries was queued
    Delivered { entries: usize },
    /// The history store failed; nothing was sent
    Unavailable,
    /// The requester is no longer attached
    Detached,
    /// The requester's queue was full for too long and it was evicted
    Evicted,
}

/// Frame a group's stored payloads as one JSON array literal
pub fn frame_history(entries: &[String]) -> String {
    format!("[{}]", entries.join(","))
}

/// Process-wide group registry and fan-out engine
pub struct Hub {
    registry: RwLock<Registry>,
    history: Arc<dyn HistoryStore>,
    config: HubConfig,
    /// Last payload appended per group, for consecutive-duplicate suppression
    last_appended: Mutex<HashMap<GroupId, LastAppended>>,
}

impl Hub {
    pub fn new(history: Arc<dyn HistoryStore>, config: HubConfig) -> Self {
        tracing::info!(
            "Hub created (queue capacity {}, enqueue timeout {:?})",
            config.queue_capacity,
            config.enqueue_timeout
        );
        Self {
            registry: RwLock::new(Registry::default()),
            history,
            config,
            last_appended: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new connection and hand back the receiving end of its queue.
    pub async fn attach(&self) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        self.registry.write().await.attach(id, tx, now_millis());
        tracing::debug!("Attached connection {} to hub", id);
        (id, rx)
    }

    /// Add `connection` to `group`, creating the group if needed.
    ///
    /// Returns the connection's updated membership.
    pub async fn join(
        &self,
        connection: ConnectionId,
        group: GroupId,
    ) -> Result<Membership, HubError> {
        let mut registry = self.registry.write().await;
        let membership = registry.join(connection, group.clone())?;
        tracing::info!("Connection {} joined group '{}'", connection, group);
        Ok(membership)
    }

    /// Remove `connection` from `group`, closing its outbound queue.
    pub async fn leave(&self, connection: ConnectionId, group: &GroupId) -> Departure {
        let departure = self.registry.write().await.leave(connection, group);
        if departure.was_member {
            tracing::info!(
                "Removed connection {} from group '{}' (queue closed: {})",
                connection,
                group,
                departure.closed_queue
            );
        }
        self.forget_groups(&departure.pruned).await;
        departure
    }

    /// Remove `connection` from every group and forget it.
    pub async fn remove_everywhere(&self, connection: ConnectionId) -> Departure {
        let departure = self.registry.write().await.remove_everywhere(connection);
        if departure.was_member || departure.closed_queue {
            tracing::info!(
                "Removed connection {} from hub (queue closed: {})",
                connection,
                departure.closed_queue
            );
        }
        self.forget_groups(&departure.pruned).await;
        departure
    }

    /// Pull every live member of `from` into `into`.
    ///
    /// Used when a message addressed to a peer opens a new group: the peer's
    /// connections become members of the sender's group.
    pub async fn pull_members(&self, from: &GroupId, into: &GroupId) -> Vec<ConnectionId> {
        let pulled = self.registry.write().await.pull_members(from, into);
        for id in &pulled {
            tracing::info!("Pulled connection {} from '{}' into group '{}'", id, from, into);
        }
        pulled
    }

    pub async fn is_member(&self, connection: ConnectionId, group: &GroupId) -> bool {
        self.registry.read().await.is_member(connection, group)
    }

    pub async fn membership(&self, connection: ConnectionId) -> Membership {
        self.registry.read().await.membership(connection)
    }

    /// Whether `connection` is still attached with an open queue
    pub async fn is_attached(&self, connection: ConnectionId) -> bool {
        self.registry.read().await.is_attached(connection)
    }

    pub async fn group_summaries(&self) -> Vec<GroupSummary> {
        self.registry.read().await.summaries()
    }

    /// Deliver `envelope` to every member of its group.
    ///
    /// Members are snapshotted under the read lock; the lock is released before
    /// any enqueue so slow members never block membership changes. Content
    /// envelopes that reached at least one member are appended to history.
    pub async fn broadcast(&self, envelope: &Envelope) -> FanoutReport {
        let recipients = self.registry.read().await.recipients(&envelope.group_id);
        tracing::debug!(
            "Broadcasting to {} member(s) of group '{}'",
            recipients.len(),
            envelope.group_id
        );

        let mut report = FanoutReport::default();
        for (id, outbound) in recipients {
            let outcome = match outbound {
                Some(outbound) => self.enqueue(&outbound, envelope.clone()).await,
                None => Enqueue::Closed,
            };
            match outcome {
                Enqueue::Delivered => report.delivered.push(id),
                Enqueue::TimedOut | Enqueue::Closed => {
                    tracing::warn!(
                        "Connection {} dead ({:?}): evicting from group '{}'",
                        id,
                        outcome,
                        envelope.group_id
                    );
                    self.leave(id, &envelope.group_id).await;
                    report.evicted.push(id);
                }
            }
        }

        if envelope.is_content() && !report.delivered.is_empty() {
            report.persisted = self.persist(envelope).await;
        }

        report
    }

    /// Send the group's full history to `connection` as one framed payload.
    pub async fn replay_history(
        &self,
        envelope: &Envelope,
        connection: ConnectionId,
    ) -> ReplayOutcome {
        let entries = match self.history.read_all(&envelope.group_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "Failed to read history of group '{}': {}",
                    envelope.group_id,
                    e
                );
                return ReplayOutcome::Unavailable;
            }
        };
        tracing::debug!(
            "Retrieved {} message(s) of group '{}' for replay",
            entries.len(),
            envelope.group_id
        );

        let Some(outbound) = self.registry.read().await.outbound(connection) else {
            return ReplayOutcome::Detached;
        };

        let replay = envelope.with_payload(frame_history(&entries));
        match self.enqueue(&outbound, replay).await {
            Enqueue::Delivered => ReplayOutcome::Delivered {
                entries: entries.len(),
            },
            outcome => {
                tracing::warn!(
                    "Connection {} dead ({:?}) during replay: evicting from group '{}'",
                    connection,
                    outcome,
                    envelope.group_id
                );
                self.leave(connection, &envelope.group_id).await;
                ReplayOutcome::Evicted
            }
        }
    }

    /// Race the enqueue against the deadline.
    async fn enqueue(&self, outbound: &Outbound, envelope: Envelope) -> Enqueue {
        tokio::select! {
            biased;
            sent = outbound.send(envelope) => match sent {
                Ok(()) => Enqueue::Delivered,
                Err(_) => Enqueue::Closed,
            },
            _ = tokio::time::sleep(self.config.enqueue_timeout) => Enqueue::TimedOut,
        }
    }

    /// Append a content payload unless it repeats the group's previous one.
    ///
    /// Only the group's own slot is held across the append, so a slow store
    /// never stalls persistence for other groups.
    async fn persist(&self, envelope: &Envelope) -> bool {
        let slot = self
            .last_appended
            .lock()
            .await
            .entry(envelope.group_id.clone())
            .or_default()
            .clone();
        let mut last = slot.lock().await;
        if last.as_deref() == Some(envelope.payload.as_str()) {
            tracing::debug!(
                "Skipping duplicate history append for group '{}'",
                envelope.group_id
            );
            return false;
        }

        match self
            .history
            .append(&envelope.group_id, &envelope.payload)
            .await
        {
            Ok(()) => {
                *last = Some(envelope.payload.clone());
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to append message to history of group '{}': {}",
                    envelope.group_id,
                    e
                );
                false
            }
        }
    }

    /// Drop duplicate-suppression state of groups that no longer exist
    async fn forget_groups(&self, groups: &[GroupId]) {
        if groups.is_empty() {
            return;
        }
        let mut last_appended = self.last_appended.lock().await;
        for group in groups {
            last_appended.remove(group);
            tracing::debug!("Group '{}' is empty and was removed", group);
        }
    }
}
