//! Shared application state.

use std::sync::Arc;

use skiff_runtime::Dispatcher;

use crate::config::ServerConfig;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Dispatches decoded payloads to skill handlers.
    pub dispatcher: Dispatcher,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            dispatcher,
            config: Arc::new(config),
        }
    }
}
