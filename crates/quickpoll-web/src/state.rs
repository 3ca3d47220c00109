//! Application state.

use std::sync::Arc;

use quickpoll_bus::MessageBus;
use quickpoll_core::{BridgeOptions, Broadcaster, LocalFanoutRegistry, MemoryPollStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryPollStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub bridge_options: BridgeOptions,
}

impl AppState {
    pub fn new(store: Arc<MemoryPollStore>, bus: Arc<dyn MessageBus>, bridge_options: BridgeOptions) -> Self {
        let registry = Arc::new(LocalFanoutRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(bus, registry, store.clone()));
        Self {
            store,
            broadcaster,
            bridge_options,
        }
    }
}
