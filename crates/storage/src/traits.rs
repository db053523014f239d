//! Storage capability definitions.
//!
//! Each capability is an independent trait. A backend implements whichever
//! subset it supports and registers each one with a
//! [`StoreComposer`](crate::StoreComposer).

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use hopper_core::{UploadId, UploadInfo};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Core capability: create uploads, append bytes, read upload records.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Persist a new upload record with zero bytes accepted.
    ///
    /// Fails with `AlreadyExists` if the ID is taken.
    async fn create_upload(&self, info: &UploadInfo) -> StorageResult<()>;

    /// Append `data` at `offset` and return the new offset.
    ///
    /// The write is all-or-nothing: on error the accepted bytes are exactly
    /// those present before the call. Fails with `OffsetMismatch` when
    /// `offset` is not the current end of the upload.
    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> StorageResult<u64>;

    /// Read the upload record. The returned offset reflects the bytes the
    /// backend actually holds.
    async fn get_info(&self, id: UploadId) -> StorageResult<UploadInfo>;

    /// Get the name of this storage backend.
    ///
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable before accepting requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Reader capability: stream the bytes accepted so far.
#[async_trait]
pub trait ContentReader: Send + Sync + 'static {
    async fn get_reader(&self, id: UploadId) -> StorageResult<ByteStream>;
}

/// Locker capability: exclusive per-upload access.
///
/// `lock_upload` never blocks; a held lock yields `StorageError::Locked`.
/// `unlock_upload` is idempotent.
#[async_trait]
pub trait Locker: Send + Sync + 'static {
    async fn lock_upload(&self, id: UploadId) -> StorageResult<()>;

    async fn unlock_upload(&self, id: UploadId) -> StorageResult<()>;
}

/// Terminator capability: delete an upload's data and record.
#[async_trait]
pub trait Terminator: Send + Sync + 'static {
    /// Fails with `NotFound` when nothing was stored under `id`.
    async fn terminate(&self, id: UploadId) -> StorageResult<()>;
}

/// Concatenator capability: assemble a final upload from partials.
#[async_trait]
pub trait Concatenator: Send + Sync + 'static {
    /// Write the ordered content of `partials` into `dest`.
    ///
    /// Assembly happens in a staging area that is published atomically, so
    /// a failed call leaves `dest` untouched.
    async fn concat_uploads(&self, dest: UploadId, partials: &[UploadId]) -> StorageResult<()>;
}

/// Length declaration capability: fix the size of a deferred-length upload.
#[async_trait]
pub trait LengthDeclarer: Send + Sync + 'static {
    async fn declare_length(&self, id: UploadId, size: u64) -> StorageResult<()>;
}
