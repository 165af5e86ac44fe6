//! Server execution logic.

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    domain::HistoryStore,
    hub::{Dispatcher, FanoutConfig, Hub, HubConfig},
};

use super::{
    connection::ConnectionConfig,
    handler::{health_check, index, list_groups, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Boxed error returned by the server entry points
pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Tuning for every layer of the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub hub: HubConfig,
    pub fanout: FanoutConfig,
    pub connection: ConnectionConfig,
}

/// WebSocket group relay server
///
/// # Example
///
/// ```ignore
/// let history = Arc::new(InMemoryHistoryStore::new());
/// let server = Server::new(history, ServerConfig::default());
/// server.run("127.0.0.1".to_string(), 3000).await?;
/// ```
pub struct Server {
    hub: Arc<Hub>,
    config: ServerConfig,
}

impl Server {
    pub fn new(history: Arc<dyn HistoryStore>, config: ServerConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new(history, config.hub)),
            config,
        }
    }

    /// Build the router and start the fan-out workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn router(&self) -> Router {
        let dispatcher = Arc::new(Dispatcher::spawn(self.hub.clone(), self.config.fanout));
        let app_state = Arc::new(AppState {
            hub: self.hub.clone(),
            dispatcher,
            connection_config: self.config.connection,
        });

        Router::new()
            // Chat page
            .route("/", get(index))
            // WebSocket endpoint
            .route("/ws", get(websocket_handler))
            // HTTP API
            .route("/api/health", get(health_check))
            .route("/api/groups", get(list_groups))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state)
    }

    /// Bind to `host:port` and serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), ServerError> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let app = self.router();
        let local_addr = listener.local_addr()?;

        tracing::info!("Group relay listening on {}", local_addr);
        tracing::info!("Connect to: ws://{}/ws", local_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
