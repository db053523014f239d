//! Per-upload mutual exclusion.

use crate::error::{EngineError, EngineResult};
use hopper_core::UploadId;
use hopper_storage::{Locker, MemoryLocker, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Proof that the lock for one upload is held.
///
/// Hand it back to [`LockManager::release`] when the guarded operation ends.
#[must_use = "a held lease must be released"]
#[derive(Debug)]
pub struct Lease {
    id: UploadId,
}

impl Lease {
    pub fn id(&self) -> UploadId {
        self.id
    }
}

/// Serializes mutating operations on a single upload.
///
/// Lock attempts never block inside the locker. When `acquire_timeout` is
/// non-zero a held lock is retried every `retry_interval` until the deadline,
/// after which the caller gets `LockConflict`.
#[derive(Clone)]
pub struct LockManager {
    locker: Arc<dyn Locker>,
    acquire_timeout: Duration,
    retry_interval: Duration,
}

impl LockManager {
    /// Build a manager over `locker`, falling back to a process-local
    /// locker when the store provides none.
    pub fn new(
        locker: Option<Arc<dyn Locker>>,
        acquire_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        let locker = locker.unwrap_or_else(|| {
            tracing::warn!(
                "Store has no locker; using an in-memory locker that only excludes writers in this process"
            );
            Arc::new(MemoryLocker::new())
        });
        Self {
            locker,
            acquire_timeout,
            retry_interval: retry_interval.max(Duration::from_millis(1)),
        }
    }

    /// Take the lock for `id`.
    pub async fn acquire(&self, id: UploadId) -> EngineResult<Lease> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            match self.locker.lock_upload(id).await {
                Ok(()) => {
                    tracing::trace!(upload_id = %id, "Lock acquired");
                    return Ok(Lease { id });
                }
                Err(StorageError::Locked(_)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(upload_id = %id, "Lock held elsewhere");
                        return Err(EngineError::LockConflict(id.to_string()));
                    }
                    tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Give the lock back. Failures are logged, never returned: the
    /// operation the lease guarded has already produced its result.
    pub async fn release(&self, lease: Lease) {
        if let Err(err) = self.locker.unlock_upload(lease.id).await {
            tracing::error!(upload_id = %lease.id, error = %err, "Failed to release upload lock");
        } else {
            tracing::trace!(upload_id = %lease.id, "Lock released");
        }
    }
}
