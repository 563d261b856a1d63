/// Shared application state for the webserver
///
/// Handed to every route handler; holds the hub, the store behind the
/// history endpoint and the configuration the process started with.
use std::sync::Arc;

use crate::{
    config::RelayConfig,
    store::RecordStore,
    webserver::ws::{hub::HubConfig, persist::PersistConfig, BroadcastHub},
};

/// Shared application state passed to all route handlers
#[derive(Clone)]
pub struct AppState {
    /// Relay configuration
    pub config: Arc<RelayConfig>,

    /// Central broadcast hub
    pub hub: Arc<BroadcastHub>,

    /// Record store (history queries read it directly)
    pub store: Arc<dyn RecordStore>,

    /// Server startup time
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state. Starts the hub's persistence
    /// dispatcher, so it must run inside a tokio runtime.
    pub fn new(config: RelayConfig, store: Arc<dyn RecordStore>) -> Self {
        let hub = BroadcastHub::new(
            Arc::clone(&store),
            HubConfig {
                client_queue_size: config.client_queue_size,
                write_timeout: config.write_timeout(),
                persist: PersistConfig {
                    queue_size: config.persist_queue_size,
                    concurrency: config.persist_concurrency,
                    timeout: config.persist_timeout(),
                },
            },
        );

        Self {
            config: Arc::new(config),
            hub,
            store,
            startup_time: chrono::Utc::now(),
        }
    }

    /// Current WebSocket connection count
    pub fn ws_connection_count(&self) -> usize {
        self.hub.registry().len()
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (chrono::Utc::now() - self.startup_time)
            .num_seconds()
            .max(0) as u64
    }
}
