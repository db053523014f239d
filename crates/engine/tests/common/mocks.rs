use async_trait::async_trait;
use bytes::Bytes;
use hopper_core::{UploadId, UploadInfo};
use hopper_storage::{DataStore, StorageError, StorageResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

/// What the wrapped core does when asked to write.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug)]
pub enum WriteBehavior {
    /// Sleep, then delegate.
    Delay(Duration),
    /// Fail with an I/O error without touching the inner store.
    Fail,
    Panic,
}

/// Core that delegates to a real store but intercepts writes.
pub struct WrappedCore {
    inner: Arc<dyn DataStore>,
    behavior: WriteBehavior,
    pub writes: AtomicUsize,
}

#[allow(dead_code)]
impl WrappedCore {
    pub fn new(inner: Arc<dyn DataStore>, behavior: WriteBehavior) -> Arc<Self> {
        Arc::new(Self {
            inner,
            behavior,
            writes: AtomicUsize::new(0),
        })
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for WrappedCore {
    async fn create_upload(&self, info: &UploadInfo) -> StorageResult<()> {
        self.inner.create_upload(info).await
    }

    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> StorageResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            WriteBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.write_chunk(id, offset, data).await
            }
            WriteBehavior::Fail => Err(StorageError::Io(std::io::Error::other(
                "injected write failure",
            ))),
            WriteBehavior::Panic => panic!("injected write panic"),
        }
    }

    async fn get_info(&self, id: UploadId) -> StorageResult<UploadInfo> {
        self.inner.get_info(id).await
    }

    fn backend_name(&self) -> &'static str {
        "wrapped"
    }
}

/// Concatenator that always fails before touching the destination.
pub struct FailingConcatenator;

#[async_trait]
impl hopper_storage::Concatenator for FailingConcatenator {
    async fn concat_uploads(&self, _dest: UploadId, _partials: &[UploadId]) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::other(
            "injected concatenation failure",
        )))
    }
}
