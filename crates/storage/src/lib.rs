//! Upload storage abstraction and backends for Hopper.
//!
//! This crate provides:
//! - Independent capability traits (core, reader, locker, terminator,
//!   concatenator, length declarer)
//! - A composer that freezes one implementation per capability
//! - Backends: in-memory cache and local filesystem
//! - A store-size budget wrapper

pub mod backends;
pub mod composer;
pub mod error;
pub mod lockers;
pub mod traits;

pub use backends::{cache::CacheStore, filesystem::FileStore, limited::LimitedStore};
pub use composer::{Capabilities, ComposedStore, StoreComposer};
pub use error::{StorageError, StorageResult};
pub use lockers::{FileLocker, MemoryLocker};
pub use traits::{
    ByteStream, Concatenator, ContentReader, DataStore, LengthDeclarer, Locker, Terminator,
};

use hopper_core::config::{BackendConfig, LockerKind, StorageConfig};
use std::sync::Arc;

/// Compose a store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<ComposedStore> {
    config.validate().map_err(StorageError::Config)?;

    let mut composer = StoreComposer::new();
    match &config.backend {
        BackendConfig::Cache { path } => {
            let store = Arc::new(CacheStore::new(path).await?);
            store.use_in(&mut composer);
            let locker = select_locker(config, store.clone());
            apply_limits(config, &mut composer, store, locker);
        }
        BackendConfig::Filesystem { path } => {
            let store = Arc::new(FileStore::new(path).await?);
            store.use_in(&mut composer);
            let locker = select_locker(config, store.clone());
            apply_limits(config, &mut composer, store, locker);
        }
    }

    composer.build()
}

/// The one locker every component of the composed store must agree on.
fn select_locker(config: &StorageConfig, store_locker: Arc<dyn Locker>) -> Arc<dyn Locker> {
    match config.locker {
        LockerKind::Store => store_locker,
        LockerKind::Memory => {
            tracing::warn!("Using in-memory locker; exclusion only holds within this process");
            Arc::new(MemoryLocker::new())
        }
    }
}

/// Register `locker` and, with a budget configured, wrap the store in a
/// [`LimitedStore`] that evicts only through that same locker.
fn apply_limits<S>(
    config: &StorageConfig,
    composer: &mut StoreComposer,
    store: Arc<S>,
    locker: Arc<dyn Locker>,
) where
    S: DataStore + Terminator + LengthDeclarer + 'static,
{
    composer.use_locker(locker.clone());
    let Some(budget) = config.store_size else {
        return;
    };
    tracing::info!(budget, "Limiting total store size");
    let limited = Arc::new(
        LimitedStore::new(budget, store.clone(), store.clone(), Some(locker))
            .with_length_declarer(store),
    );
    limited.use_in(composer);
}
