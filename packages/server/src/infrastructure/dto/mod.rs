//! Data Transfer Objects (DTOs) for external communication.
//!
//! - `websocket`: inbound envelope frames
//! - `http`: JSON responses of the HTTP API

pub mod conversion;
pub mod http;
pub mod websocket;
