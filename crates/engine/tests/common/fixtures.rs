use bytes::Bytes;
use futures::TryStreamExt;
use hopper_core::UploadId;
use hopper_engine::{EngineConfig, UploadEngine};
use hopper_storage::{CacheStore, ComposedStore, FileStore, StoreComposer};
use std::path::Path;
use std::sync::Arc;

/// Generate deterministic test data using a seeded pseudo-random generator
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }
    Bytes::from(data)
}

#[derive(Clone, Copy, Debug)]
pub enum BackendKind {
    Cache,
    Filesystem,
}

pub const ALL_BACKENDS: [BackendKind; 2] = [BackendKind::Cache, BackendKind::Filesystem];

pub async fn open_store(kind: BackendKind, dir: &Path) -> ComposedStore {
    let mut composer = StoreComposer::new();
    match kind {
        BackendKind::Cache => Arc::new(CacheStore::new(dir).await.unwrap()).use_in(&mut composer),
        BackendKind::Filesystem => {
            Arc::new(FileStore::new(dir).await.unwrap()).use_in(&mut composer)
        }
    }
    composer.build().unwrap()
}

pub async fn open_engine(kind: BackendKind, dir: &Path) -> UploadEngine {
    UploadEngine::new(open_store(kind, dir).await, EngineConfig::default())
}

#[allow(dead_code)]
pub async fn read_all(engine: &UploadEngine, id: UploadId) -> Vec<u8> {
    let chunks: Vec<Bytes> = engine
        .get_reader(id)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    chunks.concat()
}
