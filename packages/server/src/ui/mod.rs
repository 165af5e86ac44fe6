//! WebSocket relay server: HTTP surface and per-socket connections.

pub mod connection;
mod handler;
mod server;
mod signal;
pub mod state;

pub use connection::{Connection, ConnectionConfig, ConnectionError};
pub use server::{Server, ServerConfig, ServerError};
