//! Shared application state.

use std::sync::Arc;

use crate::hub::{Dispatcher, Hub};

use super::connection::ConnectionConfig;

/// Shared application state
pub struct AppState {
    /// Group registry and fan-out engine
    pub hub: Arc<Hub>,
    /// Fan-out worker pool fed by connection read loops
    pub dispatcher: Arc<Dispatcher>,
    pub connection_config: ConnectionConfig,
}
