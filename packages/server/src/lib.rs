//! Group messaging relay library.
//!
//! Clients keep a WebSocket open, join named groups and exchange messages that
//! are fanned out to every member of the same group. The [`hub::Hub`] owns group
//! membership and delivery; [`ui::Connection`] drives one client's socket.

// layers
pub mod domain;
pub mod hub;
pub mod infrastructure;
pub mod ui;
