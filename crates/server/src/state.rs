//! Application state shared across handlers.

use hopper_core::config::AppConfig;
use hopper_engine::{EngineConfig, UploadEngine};
use hopper_storage::ComposedStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload engine over the composed store.
    pub engine: UploadEngine,
}

impl AppState {
    /// Build the engine for `store` from configuration.
    pub fn new(config: AppConfig, store: ComposedStore) -> Self {
        let engine = UploadEngine::new(store, EngineConfig::from(&config));
        Self {
            config: Arc::new(config),
            engine,
        }
    }

    /// Base path uploads are served under, e.g. `/files/`.
    pub fn base_path(&self) -> &str {
        &self.config.server.base_path
    }
}
