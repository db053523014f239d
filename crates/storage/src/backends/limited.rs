//! Store-size budget wrapper.
//!
//! Wraps a core and terminator and keeps the sum of declared upload sizes
//! under a fixed budget. When a new upload does not fit, the oldest uploads
//! are terminated until it does. Only uploads created through this wrapper
//! are accounted for.
//!
//! Eviction happens below the engine: an evicted upload publishes no
//! `post-terminate` event and is not counted as a client termination. The
//! only trace is the `warn` log emitted per victim; clients see `NotFound`
//! on their next request.

use crate::composer::StoreComposer;
use crate::error::{StorageError, StorageResult};
use crate::traits::{DataStore, LengthDeclarer, Locker, Terminator};
use async_trait::async_trait;
use bytes::Bytes;
use hopper_core::{UploadId, UploadInfo};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Clone, Copy, Debug)]
struct Reservation {
    created_at: OffsetDateTime,
    size: u64,
}

#[derive(Default)]
struct Ledger {
    used: u64,
    uploads: HashMap<UploadId, Reservation>,
}

impl Ledger {
    fn release(&mut self, id: UploadId) {
        if let Some(reservation) = self.uploads.remove(&id) {
            self.used = self.used.saturating_sub(reservation.size);
        }
    }

    /// Uploads ordered oldest first.
    fn eviction_order(&self, except: UploadId) -> Vec<UploadId> {
        let mut candidates: Vec<_> = self
            .uploads
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(id, r)| (r.created_at, *id))
            .collect();
        candidates.sort();
        candidates.into_iter().map(|(_, id)| id).collect()
    }
}

/// Size-limited view over another store.
pub struct LimitedStore {
    budget: u64,
    core: Arc<dyn DataStore>,
    terminator: Arc<dyn Terminator>,
    declarer: Option<Arc<dyn LengthDeclarer>>,
    locker: Option<Arc<dyn Locker>>,
    ledger: Mutex<Ledger>,
}

impl LimitedStore {
    /// Wrap `core` and `terminator` with a byte budget.
    ///
    /// When `locker` is given, uploads are only evicted if their lock can be
    /// taken; locked uploads are skipped.
    pub fn new(
        budget: u64,
        core: Arc<dyn DataStore>,
        terminator: Arc<dyn Terminator>,
        locker: Option<Arc<dyn Locker>>,
    ) -> Self {
        Self {
            budget,
            core,
            terminator,
            declarer: None,
            locker,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Also account for sizes declared after creation.
    pub fn with_length_declarer(mut self, declarer: Arc<dyn LengthDeclarer>) -> Self {
        self.declarer = Some(declarer);
        self
    }

    /// Register the wrapped capabilities, replacing the inner ones.
    pub fn use_in(self: &Arc<Self>, composer: &mut StoreComposer) {
        composer.use_core(self.clone()).use_terminator(self.clone());
        if self.declarer.is_some() {
            composer.use_length_declarer(self.clone());
        }
    }

    /// Bytes currently reserved.
    pub async fn used(&self) -> u64 {
        self.ledger.lock().await.used
    }

    /// Make room for `needed` more bytes, evicting the oldest uploads.
    async fn ensure_space(
        &self,
        ledger: &mut Ledger,
        needed: u64,
        keep: UploadId,
    ) -> StorageResult<()> {
        if needed > self.budget {
            return Err(StorageError::QuotaExceeded(format!(
                "upload of {needed} bytes exceeds the store size of {} bytes",
                self.budget
            )));
        }

        for victim in ledger.eviction_order(keep) {
            if ledger.used + needed <= self.budget {
                break;
            }
            if self.evict(victim).await? {
                ledger.release(victim);
            }
        }

        if ledger.used + needed > self.budget {
            return Err(StorageError::QuotaExceeded(format!(
                "{needed} bytes do not fit; {} of {} bytes in use",
                ledger.used, self.budget
            )));
        }
        Ok(())
    }

    /// Terminate one upload. Returns false when it is locked.
    async fn evict(&self, id: UploadId) -> StorageResult<bool> {
        if let Some(locker) = &self.locker {
            match locker.lock_upload(id).await {
                Ok(()) => {}
                Err(StorageError::Locked(_)) => return Ok(false),
                Err(err) => return Err(err),
            }
        }

        let result = match self.terminator.terminate(id).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(true),
            Err(err) => Err(err),
        };

        if let Some(locker) = &self.locker
            && let Err(err) = locker.unlock_upload(id).await
        {
            tracing::warn!(upload_id = %id, error = %err, "Failed to unlock evicted upload");
        }

        if result.is_ok() {
            tracing::warn!(
                upload_id = %id,
                budget = self.budget,
                "Evicted upload to stay within store size; no lifecycle event is published"
            );
        }
        result
    }
}

#[async_trait]
impl DataStore for LimitedStore {
    #[instrument(skip(self, info), fields(backend = "limited", id = %info.id))]
    async fn create_upload(&self, info: &UploadInfo) -> StorageResult<()> {
        let size = if info.size_is_deferred { 0 } else { info.size };
        let mut ledger = self.ledger.lock().await;
        self.ensure_space(&mut ledger, size, info.id).await?;

        self.core.create_upload(info).await?;
        ledger.used += size;
        ledger.uploads.insert(
            info.id,
            Reservation {
                created_at: info.created_at,
                size,
            },
        );
        Ok(())
    }

    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> StorageResult<u64> {
        self.core.write_chunk(id, offset, data).await
    }

    async fn get_info(&self, id: UploadId) -> StorageResult<UploadInfo> {
        self.core.get_info(id).await
    }

    fn backend_name(&self) -> &'static str {
        self.core.backend_name()
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.core.health_check().await
    }
}

#[async_trait]
impl Terminator for LimitedStore {
    #[instrument(skip(self), fields(backend = "limited"))]
    async fn terminate(&self, id: UploadId) -> StorageResult<()> {
        let result = self.terminator.terminate(id).await;
        if matches!(result, Ok(()) | Err(StorageError::NotFound(_))) {
            self.ledger.lock().await.release(id);
        }
        result
    }
}

#[async_trait]
impl LengthDeclarer for LimitedStore {
    #[instrument(skip(self), fields(backend = "limited"))]
    async fn declare_length(&self, id: UploadId, size: u64) -> StorageResult<()> {
        let declarer = self
            .declarer
            .as_ref()
            .ok_or_else(|| StorageError::Config("no length declarer wrapped".to_string()))?;

        let mut ledger = self.ledger.lock().await;
        let previous = ledger.uploads.get(&id).map(|r| r.size).unwrap_or(0);
        let extra = size.saturating_sub(previous);
        self.ensure_space(&mut ledger, extra, id).await?;

        declarer.declare_length(id, size).await?;
        let ledger = &mut *ledger;
        if let Some(reservation) = ledger.uploads.get_mut(&id) {
            reservation.size = size;
            ledger.used += extra;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cache::CacheStore;

    async fn limited(budget: u64) -> (tempfile::TempDir, Arc<CacheStore>, LimitedStore) {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CacheStore::new(dir.path()).await.unwrap());
        let store = LimitedStore::new(budget, inner.clone(), inner.clone(), Some(inner.clone()))
            .with_length_declarer(inner.clone());
        (dir, inner, store)
    }

    fn upload_at(size: u64, seconds: i64) -> UploadInfo {
        let mut info = UploadInfo::new(UploadId::new(), size);
        info.created_at = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds);
        info
    }

    #[tokio::test]
    async fn evicts_oldest_first() {
        let (_dir, inner, store) = limited(10).await;
        let oldest = upload_at(4, 1);
        let middle = upload_at(4, 2);
        let newest = upload_at(4, 3);

        store.create_upload(&oldest).await.unwrap();
        store.create_upload(&middle).await.unwrap();
        store.create_upload(&newest).await.unwrap();

        assert!(matches!(
            inner.get_info(oldest.id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(inner.get_info(middle.id).await.is_ok());
        assert!(inner.get_info(newest.id).await.is_ok());
        assert_eq!(store.used().await, 8);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let (_dir, _inner, store) = limited(10).await;
        assert!(matches!(
            store.create_upload(&upload_at(11, 1)).await,
            Err(StorageError::QuotaExceeded(_))
        ));
        assert_eq!(store.used().await, 0);
    }

    #[tokio::test]
    async fn locked_uploads_are_not_evicted() {
        let (_dir, inner, store) = limited(10).await;
        let busy = upload_at(8, 1);
        store.create_upload(&busy).await.unwrap();
        inner.lock_upload(busy.id).await.unwrap();

        assert!(matches!(
            store.create_upload(&upload_at(8, 2)).await,
            Err(StorageError::QuotaExceeded(_))
        ));
        assert!(inner.get_info(busy.id).await.is_ok());
        inner.unlock_upload(busy.id).await.unwrap();
    }

    #[tokio::test]
    async fn terminate_releases_reservation() {
        let (_dir, _inner, store) = limited(10).await;
        let info = upload_at(6, 1);
        store.create_upload(&info).await.unwrap();
        assert_eq!(store.used().await, 6);

        store.terminate(info.id).await.unwrap();
        assert_eq!(store.used().await, 0);
    }

    #[tokio::test]
    async fn declared_length_is_reserved() {
        let (_dir, _inner, store) = limited(10).await;
        let mut info = UploadInfo::deferred(UploadId::new());
        info.created_at = OffsetDateTime::UNIX_EPOCH;
        store.create_upload(&info).await.unwrap();
        assert_eq!(store.used().await, 0);

        store.declare_length(info.id, 7).await.unwrap();
        assert_eq!(store.used().await, 7);
    }
}
