use std::sync::Arc;

use crate::config::RelayConfig;
use crate::engine::RelayEngine;
use crate::poll::PollAdapter;
use crate::registry::SessionRegistry;

/// Shared application state accessible to all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RelayEngine>,
    pub polls: Arc<PollAdapter>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Wire both transport adapters to the same registry.
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<RelayConfig>) -> Self {
        Self {
            engine: Arc::new(RelayEngine::new(registry.clone())),
            polls: Arc::new(PollAdapter::new(registry, config.poll_queue_capacity)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.engine.registry()
    }
}
