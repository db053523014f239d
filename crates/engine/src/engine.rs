//! The upload session engine.

use crate::error::{EngineError, EngineResult};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventBus, UploadEvent};
use crate::lock::LockManager;
use bytes::Bytes;
use futures::FutureExt;
use hopper_core::config::AppConfig;
use hopper_core::{HookEvent, UploadId, UploadInfo};
use hopper_storage::{ByteStream, Capabilities, ComposedStore, StorageError};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::instrument;

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Largest accepted upload, `None` for unlimited.
    pub max_size: Option<u64>,
    pub lock_acquire_timeout: Duration,
    pub lock_retry_interval: Duration,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            lock_acquire_timeout: Duration::ZERO,
            lock_retry_interval: Duration::from_millis(25),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_size: config.server.max_size(),
            lock_acquire_timeout: config.locking.acquire_timeout(),
            lock_retry_interval: config.locking.retry_interval(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Declared length of a new upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadLength {
    Known(u64),
    /// Size supplied later through `declare_length`.
    Deferred,
}

impl UploadLength {
    /// Interpret a size as sent by a client.
    pub fn from_declared(size: i64, deferred: bool) -> EngineResult<Self> {
        match (size, deferred) {
            (0, true) => Ok(Self::Deferred),
            (_, true) => Err(EngineError::Validation(
                "a deferred upload cannot also declare a size".to_string(),
            )),
            (size, false) if size < 0 => Err(EngineError::Validation(format!(
                "upload size must not be negative: {size}"
            ))),
            (size, false) => Ok(Self::Known(size as u64)),
        }
    }
}

/// Parameters for [`UploadEngine::create`].
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub length: UploadLength,
    pub metadata: BTreeMap<String, String>,
    pub is_partial: bool,
}

impl NewUpload {
    pub fn with_size(size: u64) -> Self {
        Self {
            length: UploadLength::Known(size),
            metadata: BTreeMap::new(),
            is_partial: false,
        }
    }

    pub fn deferred() -> Self {
        Self {
            length: UploadLength::Deferred,
            metadata: BTreeMap::new(),
            is_partial: false,
        }
    }

    pub fn partial(mut self) -> Self {
        self.is_partial = true;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

struct EngineInner {
    store: ComposedStore,
    locks: LockManager,
    events: EventBus,
    max_size: Option<u64>,
}

/// Coordinates uploads over a composed store.
///
/// Cheap to clone; all clones share one store, lock manager and event bus.
#[derive(Clone)]
pub struct UploadEngine {
    inner: Arc<EngineInner>,
}

impl UploadEngine {
    pub fn new(store: ComposedStore, config: EngineConfig) -> Self {
        let locks = LockManager::new(
            store.locker().cloned(),
            config.lock_acquire_timeout,
            config.lock_retry_interval,
        );
        Self {
            inner: Arc::new(EngineInner {
                store,
                locks,
                events: EventBus::new(config.event_capacity),
                max_size: config.max_size,
            }),
        }
    }

    /// Capabilities of the underlying store.
    pub fn capabilities(&self) -> Capabilities {
        self.inner.store.capabilities()
    }

    pub fn max_size(&self) -> Option<u64> {
        self.inner.max_size
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.store.core().backend_name()
    }

    /// Check the storage backend is usable.
    pub async fn health_check(&self) -> EngineResult<()> {
        Ok(self.inner.store.core().health_check().await?)
    }

    /// Receive lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Start a new upload with zero bytes accepted.
    #[instrument(skip(self, new), fields(backend = self.backend_name()))]
    pub async fn create(&self, new: NewUpload) -> EngineResult<UploadInfo> {
        let id = UploadId::new();
        let mut info = match new.length {
            UploadLength::Known(size) => {
                self.inner.check_max_size(size)?;
                UploadInfo::new(id, size)
            }
            UploadLength::Deferred => {
                if self.inner.store.length_declarer().is_none() {
                    return Err(EngineError::ExtensionUnsupported("creation-defer-length"));
                }
                UploadInfo::deferred(id)
            }
        };
        info.metadata = new.metadata;
        info.is_partial = new.is_partial;
        info.validate()?;

        self.inner.store.core().create_upload(&info).await?;
        tracing::info!(upload_id = %id, size = info.size, deferred = info.size_is_deferred, "Upload created");
        self.inner.events.publish(HookEvent::PostCreate, &info);
        // An empty upload has all of its bytes the moment it exists.
        if info.is_complete() {
            self.inner.events.publish(HookEvent::PostFinish, &info);
        }
        Ok(info)
    }

    /// Append `data` at `offset` and return the new offset.
    pub async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> EngineResult<u64> {
        self.run_locked(id, move |inner| async move {
            inner.write_chunk(id, offset, data).await
        })
        .await
    }

    /// Snapshot of an upload. Never locks, so it may lag a concurrent write.
    pub async fn get_info(&self, id: UploadId) -> EngineResult<UploadInfo> {
        self.inner.get_info(id).await
    }

    /// Stream the bytes accepted so far, in write order.
    pub async fn get_reader(&self, id: UploadId) -> EngineResult<ByteStream> {
        let reader = self
            .inner
            .store
            .reader()
            .ok_or(EngineError::ExtensionUnsupported("download"))?;
        Ok(reader.get_reader(id).await?)
    }

    /// Delete an upload. Unknown IDs succeed; the return value tells
    /// whether anything was deleted.
    pub async fn terminate(&self, id: UploadId) -> EngineResult<bool> {
        if self.inner.store.terminator().is_none() {
            return Err(EngineError::ExtensionUnsupported("termination"));
        }
        self.run_locked(id, move |inner| async move { inner.terminate(id).await })
            .await
    }

    /// Assemble `partials` into the final upload `dest`.
    pub async fn concatenate(&self, dest: UploadId, partials: Vec<UploadId>) -> EngineResult<()> {
        if self.inner.store.concatenator().is_none() {
            return Err(EngineError::ExtensionUnsupported("concatenation"));
        }
        self.run_locked(dest, move |inner| async move {
            inner.concatenate(dest, &partials).await
        })
        .await
    }

    /// Create a final upload from complete partials and assemble it.
    #[instrument(skip(self, partials, metadata), fields(partials = partials.len()))]
    pub async fn create_final(
        &self,
        partials: Vec<UploadId>,
        metadata: BTreeMap<String, String>,
    ) -> EngineResult<UploadInfo> {
        if self.inner.store.concatenator().is_none() {
            return Err(EngineError::ExtensionUnsupported("concatenation"));
        }
        let size = self.inner.check_partials(&partials).await?;
        self.inner.check_max_size(size)?;

        let mut info = UploadInfo::new(UploadId::new(), size);
        info.is_final = true;
        info.partial_uploads = partials.clone();
        info.metadata = metadata;
        info.validate()?;

        self.inner.store.core().create_upload(&info).await?;
        self.inner.events.publish(HookEvent::PostCreate, &info);

        if let Err(err) = self.concatenate(info.id, partials).await {
            tracing::warn!(upload_id = %info.id, error = %err, "Concatenation failed; removing final upload");
            if let Some(terminator) = self.inner.store.terminator()
                && let Err(cleanup) = terminator.terminate(info.id).await
            {
                tracing::error!(upload_id = %info.id, error = %cleanup, "Failed to remove final upload");
            }
            return Err(err);
        }

        info.offset = size;
        Ok(info)
    }

    /// Fix the size of a deferred upload.
    pub async fn declare_length(&self, id: UploadId, size: u64) -> EngineResult<()> {
        if self.inner.store.length_declarer().is_none() {
            return Err(EngineError::ExtensionUnsupported("creation-defer-length"));
        }
        self.run_locked(id, move |inner| async move {
            inner.declare_length(id, size).await
        })
        .await
    }

    /// Run `op` under the lock for `id` in a detached task.
    ///
    /// The task owns the lease, so dropping the caller's future cannot leave
    /// the lock held. A panic in `op` releases the lock and surfaces as
    /// `Internal`.
    async fn run_locked<T, F, Fut>(&self, id: UploadId, op: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EngineInner>) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let lease = inner.locks.acquire(id).await?;
            let outcome = AssertUnwindSafe(op(inner.clone())).catch_unwind().await;
            inner.locks.release(lease).await;

            outcome.unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!(upload_id = %id, panic = %message, "Upload operation panicked");
                Err(EngineError::Internal(format!("operation panicked: {message}")))
            })
        });

        task.await
            .map_err(|e| EngineError::Internal(format!("operation task failed: {e}")))?
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl EngineInner {
    fn check_max_size(&self, size: u64) -> EngineResult<()> {
        match self.max_size {
            Some(max) if size > max => Err(EngineError::MaxSizeExceeded { size, max }),
            _ => Ok(()),
        }
    }

    async fn get_info(&self, id: UploadId) -> EngineResult<UploadInfo> {
        Ok(self.store.core().get_info(id).await?)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> EngineResult<u64> {
        let mut info = self.get_info(id).await?;
        if info.is_final {
            return Err(EngineError::ModifyFinal(id.to_string()));
        }
        if info.offset != offset {
            return Err(EngineError::OffsetMismatch {
                expected: info.offset,
                actual: offset,
            });
        }
        if data.is_empty() {
            return Ok(offset);
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(EngineError::SizeExceeded {
                size: info.size,
                attempted: u64::MAX,
            })?;
        if info.size_is_deferred {
            self.check_max_size(end)?;
        } else if end > info.size {
            return Err(EngineError::SizeExceeded {
                size: info.size,
                attempted: end,
            });
        }

        let new_offset = self.store.core().write_chunk(id, offset, data).await?;
        info.offset = new_offset;
        tracing::debug!(upload_id = %id, offset = new_offset, "Chunk accepted");

        self.events.publish(HookEvent::PostReceive, &info);
        if info.is_complete() {
            tracing::info!(upload_id = %id, size = info.size, "Upload complete");
            self.events.publish(HookEvent::PostFinish, &info);
        }
        Ok(new_offset)
    }

    #[instrument(skip(self))]
    async fn terminate(&self, id: UploadId) -> EngineResult<bool> {
        let Some(terminator) = self.store.terminator() else {
            return Err(EngineError::ExtensionUnsupported("termination"));
        };
        let last_known = self.get_info(id).await.ok();

        match terminator.terminate(id).await {
            Ok(()) => {
                tracing::info!(upload_id = %id, "Upload terminated");
                let info = last_known.unwrap_or_else(|| UploadInfo::new(id, 0));
                self.events.publish(HookEvent::PostTerminate, &info);
                Ok(true)
            }
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(upload_id = %id, "Terminate of unknown upload");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Verify every partial exists, is a partial upload and is complete.
    /// Returns the sum of their sizes.
    async fn check_partials(&self, partials: &[UploadId]) -> EngineResult<u64> {
        if partials.is_empty() {
            return Err(EngineError::InvalidConcat(
                "no partial uploads given".to_string(),
            ));
        }

        let mut total = 0u64;
        for id in partials {
            let info = match self.get_info(*id).await {
                Ok(info) => info,
                Err(EngineError::NotFound(_)) => {
                    return Err(EngineError::InvalidConcat(format!(
                        "partial upload {id} does not exist"
                    )));
                }
                Err(err) => return Err(err),
            };
            if !info.is_partial {
                return Err(EngineError::InvalidConcat(format!(
                    "upload {id} is not a partial upload"
                )));
            }
            if !info.is_complete() {
                return Err(EngineError::PartialNotReady(id.to_string()));
            }
            total = total.checked_add(info.size).ok_or_else(|| {
                EngineError::InvalidConcat("combined size overflows".to_string())
            })?;
        }
        Ok(total)
    }

    #[instrument(skip(self, partials), fields(partials = partials.len()))]
    async fn concatenate(&self, dest: UploadId, partials: &[UploadId]) -> EngineResult<()> {
        let Some(concatenator) = self.store.concatenator() else {
            return Err(EngineError::ExtensionUnsupported("concatenation"));
        };

        let mut info = self.get_info(dest).await?;
        if !info.is_final {
            return Err(EngineError::InvalidConcat(format!(
                "upload {dest} is not a final upload"
            )));
        }
        if info.offset > 0 {
            return Err(EngineError::ModifyFinal(dest.to_string()));
        }
        if !info.partial_uploads.is_empty() && info.partial_uploads != partials {
            return Err(EngineError::InvalidConcat(
                "partial uploads differ from those recorded on the final upload".to_string(),
            ));
        }

        let total = self.check_partials(partials).await?;
        if total != info.size {
            return Err(EngineError::InvalidConcat(format!(
                "partials hold {total} bytes but the final upload declares {}",
                info.size
            )));
        }

        concatenator.concat_uploads(dest, partials).await?;
        info.offset = total;
        tracing::info!(upload_id = %dest, size = total, "Final upload assembled");
        self.events.publish(HookEvent::PostFinish, &info);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn declare_length(&self, id: UploadId, size: u64) -> EngineResult<()> {
        let Some(declarer) = self.store.length_declarer() else {
            return Err(EngineError::ExtensionUnsupported("creation-defer-length"));
        };

        let mut info = self.get_info(id).await?;
        if !info.size_is_deferred {
            return Err(EngineError::Validation(format!(
                "upload {id} already has a length"
            )));
        }
        if size < info.offset {
            return Err(EngineError::SizeExceeded {
                size,
                attempted: info.offset,
            });
        }
        self.check_max_size(size)?;

        declarer.declare_length(id, size).await?;
        info.size = size;
        info.size_is_deferred = false;
        tracing::debug!(upload_id = %id, size, "Upload length declared");
        if info.is_complete() {
            self.events.publish(HookEvent::PostFinish, &info);
        }
        Ok(())
    }
}
