//! Bounded fan-out worker pool.
//!
//! Read loops hand envelopes to the [`Dispatcher`] instead of spawning a task
//! per message. Jobs are sharded by group id, so all work for one group runs on
//! one worker in submission order: broadcasts into a group keep their order and
//! never interleave with a replay of the same group.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use tokio::sync::mpsc;

use crate::domain::{ConnectionId, DispatchError, Envelope, GroupId};

use super::{FanoutConfig, Hub};

/// Work item for a fan-out worker
#[derive(Debug, Clone)]
pub enum FanoutJob {
    /// Deliver to every member of the envelope's group
    Broadcast(Envelope),
    /// Send the group's history to one connection
    Replay {
        envelope: Envelope,
        connection: ConnectionId,
    },
}

impl FanoutJob {
    pub fn group_id(&self) -> &GroupId {
        match self {
            FanoutJob::Broadcast(envelope) => &envelope.group_id,
            FanoutJob::Replay { envelope, .. } => &envelope.group_id,
        }
    }
}

/// Handle to the fan-out worker pool
pub struct Dispatcher {
    shards: Vec<mpsc::Sender<FanoutJob>>,
}

impl Dispatcher {
    /// Spawn `config.workers` workers, each with a queue of `config.backlog` jobs.
    ///
    /// Workers stop once the dispatcher is dropped and their queues drain.
    pub fn spawn(hub: Arc<Hub>, config: FanoutConfig) -> Self {
        let workers = config.workers.max(1);
        let shards = (0..workers)
            .map(|index| {
                let (tx, rx) = mpsc::channel(config.backlog.max(1));
                tokio::spawn(worker_loop(index, hub.clone(), rx));
                tx
            })
            .collect();
        tracing::info!("Started {} fan-out worker(s)", workers);

        Self { shards }
    }

    /// Queue a job, waiting while the owning worker's backlog is full.
    pub async fn submit(&self, job: FanoutJob) -> Result<(), DispatchError> {
        let shard = shard_index(job.group_id(), self.shards.len());
        self.shards[shard]
            .send(job)
            .await
            .map_err(|_| DispatchError::Stopped)
    }
}

fn shard_index(group_id: &GroupId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    group_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

async fn worker_loop(index: usize, hub: Arc<Hub>, mut rx: mpsc::Receiver<FanoutJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            FanoutJob::Broadcast(envelope) => {
                let report = hub.broadcast(&envelope).await;
                tracing::debug!(
                    "Worker {}: delivered to {} member(s) of '{}', evicted {}",
                    index,
                    report.delivered.len(),
                    envelope.group_id,
                    report.evicted.len()
                );
            }
            FanoutJob::Replay {
                envelope,
                connection,
            } => {
                let outcome = hub.replay_history(&envelope, connection).await;
                tracing::debug!(
                    "Worker {}: replay of '{}' to {}: {:?}",
                    index,
                    envelope.group_id,
                    connection,
                    outcome
                );
            }
        }
    }
    tracing::debug!("Fan-out worker {} stopped", index);
}
