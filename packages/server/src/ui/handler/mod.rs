//! HTTP and WebSocket handlers.

mod http;
mod websocket;

pub use http::{health_check, index, list_groups};
pub use websocket::websocket_handler;
