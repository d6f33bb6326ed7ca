//! Engine registry: one ConnectionManager per engine name, created lazily on
//! first reference and owned here for the life of the process. Constructed by
//! `main` and handed to the router through `AppState`; there is no global.

use std::collections::HashMap;
use std::sync::Arc;

use engine_link::{ConnectionManager, StatusSink};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::GatewayConfig;

pub struct EngineRegistry {
    engines: RwLock<HashMap<String, Arc<ConnectionManager>>>,
    config: Arc<GatewayConfig>,
    sink: StatusSink,
}

impl EngineRegistry {
    pub fn new(config: Arc<GatewayConfig>, sink: StatusSink) -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
            config,
            sink,
        }
    }

    /// Get the manager for an engine, creating it and starting its
    /// reconnection driver on first use.
    pub async fn get_or_connect(&self, name: &str) -> Arc<ConnectionManager> {
        if let Some(manager) = self.engines.read().await.get(name) {
            return Arc::clone(manager);
        }

        let mut engines = self.engines.write().await;
        // Raced with another request for the same engine.
        if let Some(manager) = engines.get(name) {
            return Arc::clone(manager);
        }

        let host = self.config.resolve_host(name);
        info!(engine = %name, host = %host, "creating engine connection");
        let manager = ConnectionManager::new(name, host, self.config.engine_port, self.sink.clone());
        manager.start();
        manager.attempt_connection().await;
        engines.insert(name.to_string(), Arc::clone(&manager));
        manager
    }

    /// Route subscriber pushes to exactly one engine.
    pub async fn select_engine(&self, name: &str) {
        // Make sure the target exists before flipping flags.
        self.get_or_connect(name).await;
        let engines = self.engines.read().await;
        for (engine_name, manager) in engines.iter() {
            manager.set_selected(engine_name == name).await;
        }
    }

    /// Stop broadcasting for one engine without selecting another.
    pub async fn deselect_engine(&self, name: &str) {
        if let Some(manager) = self.engines.read().await.get(name) {
            manager.set_selected(false).await;
        }
    }

    pub async fn count(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn connected_count(&self) -> usize {
        let engines = self.engines.read().await;
        let mut connected = 0;
        for manager in engines.values() {
            if manager.is_connected().await {
                connected += 1;
            }
        }
        connected
    }

    /// Tear down every manager. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        let engines = self.engines.read().await;
        for manager in engines.values() {
            manager.shutdown().await;
        }
        info!("engine registry shut down");
    }
}
