//! Hub and fan-out tuning.

use std::time::Duration;

/// Capacity of each connection's outbound queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// How long a fan-out waits on a full queue before evicting the member
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Number of fan-out workers
pub const DEFAULT_FANOUT_WORKERS: usize = 4;
/// Pending jobs per fan-out worker before submitters wait
pub const DEFAULT_FANOUT_BACKLOG: usize = 1024;

/// Hub configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

/// Fan-out worker pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    pub workers: usize,
    pub backlog: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_FANOUT_WORKERS,
            backlog: DEFAULT_FANOUT_BACKLOG,
        }
    }
}
