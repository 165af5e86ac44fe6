//! Group messaging relay server.
//!
//! Clients connect over WebSocket, join groups and receive every message sent
//! to the groups they belong to.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin huddle-server
//! cargo run --bin huddle-server -- --host 0.0.0.0 --port 3000
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;

use huddle_server::{
    domain::HistoryStore,
    hub::{
        DEFAULT_FANOUT_BACKLOG, DEFAULT_FANOUT_WORKERS, DEFAULT_QUEUE_CAPACITY, FanoutConfig,
        HubConfig,
    },
    infrastructure::history::InMemoryHistoryStore,
    ui::{ConnectionConfig, Server, ServerConfig},
};
use huddle_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "huddle-server")]
#[command(about = "WebSocket group messaging relay", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "3000")]
    port: u16,

    /// Capacity of each connection's outbound queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Milliseconds a fan-out waits on a full queue before evicting the member
    #[arg(long, default_value = "1000")]
    enqueue_timeout_ms: u64,

    /// Seconds between liveness probes
    #[arg(long, default_value = "60")]
    ping_interval_secs: u64,

    /// Seconds allowed for writing a liveness probe
    #[arg(long, default_value = "5")]
    ping_timeout_secs: u64,

    /// Seconds allowed for writing one outbound message
    #[arg(long, default_value = "10")]
    write_timeout_secs: u64,

    /// Number of fan-out workers
    #[arg(long, default_value_t = DEFAULT_FANOUT_WORKERS)]
    fanout_workers: usize,

    /// Maximum stored messages per group (unbounded when omitted)
    #[arg(long)]
    history_capacity: Option<usize>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            hub: HubConfig {
                queue_capacity: self.queue_capacity,
                enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
            },
            fanout: FanoutConfig {
                workers: self.fanout_workers,
                backlog: DEFAULT_FANOUT_BACKLOG,
            },
            connection: ConnectionConfig {
                ping_interval: Duration::from_secs(self.ping_interval_secs),
                ping_timeout: Duration::from_secs(self.ping_timeout_secs),
                write_timeout: Duration::from_secs(self.write_timeout_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();
    let config = args.server_config();

    let history: Arc<dyn HistoryStore> = match args.history_capacity {
        Some(capacity) => Arc::new(InMemoryHistoryStore::with_capacity(capacity)),
        None => Arc::new(InMemoryHistoryStore::new()),
    };

    let server = Server::new(history, config);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
