//! Per-upload lockers.

use crate::error::{StorageError, StorageResult};
use crate::traits::Locker;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fs2::FileExt;
use hopper_core::UploadId;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Process-local locker.
///
/// Exclusion only holds within one process. Use [`FileLocker`] when several
/// processes share a store.
#[derive(Default)]
pub struct MemoryLocker {
    held: DashMap<UploadId, ()>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn lock_upload(&self, id: UploadId) -> StorageResult<()> {
        match self.held.entry(id) {
            Entry::Occupied(_) => Err(StorageError::Locked(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(())
            }
        }
    }

    async fn unlock_upload(&self, id: UploadId) -> StorageResult<()> {
        self.held.remove(&id);
        Ok(())
    }
}

/// Locker backed by `<dir>/<id>.lock` files holding an exclusive `flock`.
///
/// Locks are visible to every process sharing `dir`. The open handle is kept
/// for as long as the lock is held; unlocking drops it and removes the file.
pub struct FileLocker {
    dir: PathBuf,
    held: DashMap<UploadId, File>,
}

impl FileLocker {
    /// Create a locker rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            held: DashMap::new(),
        })
    }

    fn lock_path(&self, id: UploadId) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    fn try_lock_sync(path: &Path, id: UploadId) -> StorageResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || err.kind() == std::io::ErrorKind::WouldBlock
            {
                return Err(StorageError::Locked(id.to_string()));
            }
            return Err(StorageError::Io(err));
        }

        // A concurrent unlock may have removed the file between our open and
        // our flock, leaving us holding a lock on an unlinked inode.
        if !same_file(&file, path)? {
            return Err(StorageError::Locked(id.to_string()));
        }

        Ok(file)
    }
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> StorageResult<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::Io(err)),
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> StorageResult<bool> {
    Ok(path.exists())
}

#[async_trait]
impl Locker for FileLocker {
    #[instrument(skip(self), fields(locker = "file"))]
    async fn lock_upload(&self, id: UploadId) -> StorageResult<()> {
        if self.held.contains_key(&id) {
            return Err(StorageError::Locked(id.to_string()));
        }

        let path = self.lock_path(id);
        let file = tokio::task::spawn_blocking(move || Self::try_lock_sync(&path, id))
            .await
            .map_err(|e| StorageError::Internal(format!("spawn_blocking failed: {e}")))??;

        match self.held.entry(id) {
            Entry::Occupied(_) => Err(StorageError::Locked(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(file);
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(locker = "file"))]
    async fn unlock_upload(&self, id: UploadId) -> StorageResult<()> {
        let Some((_, file)) = self.held.remove(&id) else {
            return Ok(());
        };

        // Remove while still holding the flock so no other process can
        // acquire the doomed inode in between.
        match tokio::fs::remove_file(self.lock_path(id)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        drop(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_locker_rejects_second_lock() {
        let locker = MemoryLocker::new();
        let id = UploadId::new();

        locker.lock_upload(id).await.unwrap();
        assert!(matches!(
            locker.lock_upload(id).await,
            Err(StorageError::Locked(_))
        ));

        locker.unlock_upload(id).await.unwrap();
        locker.unlock_upload(id).await.unwrap();
        locker.lock_upload(id).await.unwrap();
    }

    #[tokio::test]
    async fn file_locker_excludes_other_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileLocker::new(dir.path()).await.unwrap();
        let second = FileLocker::new(dir.path()).await.unwrap();
        let id = UploadId::new();

        first.lock_upload(id).await.unwrap();
        assert!(dir.path().join(format!("{id}.lock")).exists());
        assert!(matches!(
            second.lock_upload(id).await,
            Err(StorageError::Locked(_))
        ));
        assert!(matches!(
            first.lock_upload(id).await,
            Err(StorageError::Locked(_))
        ));

        first.unlock_upload(id).await.unwrap();
        assert!(!dir.path().join(format!("{id}.lock")).exists());
        second.lock_upload(id).await.unwrap();
        second.unlock_upload(id).await.unwrap();
    }

    #[tokio::test]
    async fn file_locker_unlock_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FileLocker::new(dir.path()).await.unwrap();
        let id = UploadId::new();

        locker.unlock_upload(id).await.unwrap();
        locker.lock_upload(id).await.unwrap();
        locker.unlock_upload(id).await.unwrap();
        locker.unlock_upload(id).await.unwrap();
    }

    #[tokio::test]
    async fn file_locker_independent_ids() {
        let dir = tempfile::tempdir().unwrap();
        let locker = FileLocker::new(dir.path()).await.unwrap();
        let a = UploadId::new();
        let b = UploadId::new();

        locker.lock_upload(a).await.unwrap();
        locker.lock_upload(b).await.unwrap();
        locker.unlock_upload(a).await.unwrap();
        locker.unlock_upload(b).await.unwrap();
    }
}
