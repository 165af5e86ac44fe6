//! WebSocket upgrade handler.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::ui::{connection::Connection, state::AppState};

/// Upgrade the request and attach a new [`Connection`] to the hub.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_failed_upgrade(|e| tracing::warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| {
            Connection::serve(
                socket,
                state.hub.clone(),
                state.dispatcher.clone(),
                state.connection_config,
            )
        })
}
