use bytes::Bytes;
use hopper_storage::{CacheStore, ComposedStore, FileStore, StoreComposer};
use std::path::Path;
use std::sync::Arc;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Backends every contract test runs against.
#[derive(Clone, Copy, Debug)]
pub enum BackendKind {
    Cache,
    Filesystem,
}

pub const ALL_BACKENDS: [BackendKind; 2] = [BackendKind::Cache, BackendKind::Filesystem];

/// Compose a store of the given kind rooted at `dir`.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_seeded_bytes_different_seeds() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(43, 1000);
        assert_ne!(data1, data2);
    }
}
