//! In-memory upload store.
//!
//! Upload bytes live in process memory; only the `.info` sidecar and the
//! `.lock` files touch disk. A restart loses every byte, after which the
//! surviving sidecars report `NotFound`.

use super::sidecar;
use crate::composer::StoreComposer;
use crate::error::{StorageError, StorageResult};
use crate::lockers::FileLocker;
use crate::traits::{
    ByteStream, Concatenator, ContentReader, DataStore, LengthDeclarer, Locker, Terminator,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hopper_core::{UploadId, UploadInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Bytes accepted for one upload, as immutable segments in write order.
#[derive(Clone, Debug, Default)]
struct CachedData {
    segments: Vec<Bytes>,
    len: u64,
}

impl CachedData {
    fn push(&mut self, data: Bytes) {
        self.len += data.len() as u64;
        self.segments.push(data);
    }
}

/// Upload store holding data in memory.
///
/// **Single-process only.** Locks are file based and therefore visible to
/// other processes, but the data they guard is not.
pub struct CacheStore {
    dir: PathBuf,
    files: DashMap<UploadId, CachedData>,
    locker: FileLocker,
}

impl CacheStore {
    /// Create a cache store keeping sidecars and lock files under `dir`.
    pub async fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let locker = FileLocker::new(&dir).await?;
        tracing::warn!(
            path = %dir.display(),
            "Cache store keeps upload data in memory; it is only valid for single-process deployments"
        );
        Ok(Self {
            dir,
            files: DashMap::new(),
            locker,
        })
    }

    /// Register every capability this store implements.
    pub fn use_in(self: &Arc<Self>, composer: &mut StoreComposer) {
        composer
            .use_core(self.clone())
            .use_reader(self.clone())
            .use_terminator(self.clone())
            .use_locker(self.clone())
            .use_concatenator(self.clone())
            .use_length_declarer(self.clone());
    }

    fn snapshot(&self, id: UploadId) -> StorageResult<CachedData> {
        self.files
            .get(&id)
            .map(|data| data.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl DataStore for CacheStore {
    #[instrument(skip(self, info), fields(backend = "cache", id = %info.id))]
    async fn create_upload(&self, info: &UploadInfo) -> StorageResult<()> {
        if self.files.contains_key(&info.id) {
            return Err(StorageError::AlreadyExists(info.id.to_string()));
        }

        sidecar::write_info(&self.dir, info).await?;

        match self.files.entry(info.id) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(info.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(CachedData::default());
                Ok(())
            }
        }
    }

    #[instrument(skip(self, data), fields(backend = "cache", size = data.len()))]
    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> StorageResult<u64> {
        let mut file = self
            .files
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if file.len != offset {
            return Err(StorageError::OffsetMismatch {
                expected: file.len,
                actual: offset,
            });
        }

        if !data.is_empty() {
            file.push(data);
        }
        Ok(file.len)
    }

    #[instrument(skip(self), fields(backend = "cache"))]
    async fn get_info(&self, id: UploadId) -> StorageResult<UploadInfo> {
        if !self.files.contains_key(&id) {
            return Err(StorageError::NotFound(id.to_string()));
        }

        let mut info = sidecar::read_info(&self.dir, id).await?;
        info.offset = self.snapshot(id)?.len;
        Ok(info)
    }

    fn backend_name(&self) -> &'static str {
        "cache"
    }

    #[instrument(skip(self), fields(backend = "cache"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = tokio::fs::metadata(&self.dir).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "cache directory is not a directory: {}",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentReader for CacheStore {
    #[instrument(skip(self), fields(backend = "cache"))]
    async fn get_reader(&self, id: UploadId) -> StorageResult<ByteStream> {
        let data = self.snapshot(id)?;
        Ok(Box::pin(futures::stream::iter(
            data.segments.into_iter().map(Ok),
        )))
    }
}

#[async_trait]
impl Terminator for CacheStore {
    #[instrument(skip(self), fields(backend = "cache"))]
    async fn terminate(&self, id: UploadId) -> StorageResult<()> {
        let had_info = sidecar::remove_info(&self.dir, id).await?;
        let had_data = self.files.remove(&id).is_some();
        if !had_info && !had_data {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Concatenator for CacheStore {
    #[instrument(skip(self, partials), fields(backend = "cache", partials = partials.len()))]
    async fn concat_uploads(&self, dest: UploadId, partials: &[UploadId]) -> StorageResult<()> {
        let mut assembled = CachedData::default();
        for id in partials {
            for segment in self.snapshot(*id)?.segments {
                assembled.push(segment);
            }
        }

        let mut file = self
            .files
            .get_mut(&dest)
            .ok_or_else(|| StorageError::NotFound(dest.to_string()))?;
        if file.len != 0 {
            return Err(StorageError::OffsetMismatch {
                expected: file.len,
                actual: 0,
            });
        }
        *file = assembled;
        Ok(())
    }
}

#[async_trait]
impl Locker for CacheStore {
    async fn lock_upload(&self, id: UploadId) -> StorageResult<()> {
        self.locker.lock_upload(id).await
    }

    async fn unlock_upload(&self, id: UploadId) -> StorageResult<()> {
        self.locker.unlock_upload(id).await
    }
}

#[async_trait]
impl LengthDeclarer for CacheStore {
    #[instrument(skip(self), fields(backend = "cache"))]
    async fn declare_length(&self, id: UploadId, size: u64) -> StorageResult<()> {
        if !self.files.contains_key(&id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        sidecar::declare_length(&self.dir, id, size).await
    }
}
