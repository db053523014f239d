//! Local filesystem upload store.

use super::sidecar;
use crate::composer::StoreComposer;
use crate::error::{StorageError, StorageResult};
use crate::lockers::FileLocker;
use crate::traits::{
    ByteStream, Concatenator, ContentReader, DataStore, LengthDeclarer, Locker, Terminator,
};
use async_trait::async_trait;
use bytes::Bytes;
use hopper_core::{UploadId, UploadInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Durable upload store.
///
/// Each upload is `<root>/<id>.bin` (data) plus `<root>/<id>.info` (record).
/// The offset is always the length of the data file.
pub struct FileStore {
    root: PathBuf,
    locker: FileLocker,
}

impl FileStore {
    /// Create a new filesystem store.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let locker = FileLocker::new(&root).await?;
        Ok(Self { root, locker })
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

    fn data_path(&self, id: UploadId) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }

    async fn data_len(&self, id: UploadId) -> StorageResult<u64> {
        let metadata = fs::metadata(self.data_path(id))
            .await
            .map_err(|e| StorageError::from_io(id, e))?;
        Ok(metadata.len())
    }

    async fn open_data(&self, id: UploadId) -> StorageResult<fs::File> {
        fs::File::open(self.data_path(id))
            .await
            .map_err(|e| StorageError::from_io(id, e))
    }

    /// Copy the partials into a staging file and fsync it.
    async fn assemble(&self, staging: &Path, partials: &[UploadId]) -> StorageResult<()> {
        let mut out = fs::File::create(staging).await?;
        for id in partials {
            let mut src = self.open_data(*id).await?;
            tokio::io::copy(&mut src, &mut out).await?;
        }
        out.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for FileStore {
    #[instrument(skip(self, info), fields(backend = "filesystem", id = %info.id))]
    async fn create_upload(&self, info: &UploadInfo) -> StorageResult<()> {
        let path = self.data_path(info.id);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists(info.id.to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;

        if let Err(err) = sidecar::write_info(&self.root, info).await {
            let _ = fs::remove_file(&path).await;
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn write_chunk(&self, id: UploadId, offset: u64, data: Bytes) -> StorageResult<u64> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.data_path(id))
            .await
            .map_err(|e| StorageError::from_io(id, e))?;

        let current = file.metadata().await?.len();
        if current != offset {
            return Err(StorageError::OffsetMismatch {
                expected: current,
                actual: offset,
            });
        }
        if data.is_empty() {
            return Ok(current);
        }

        let written = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(err) = written {
            // Roll back to the previous prefix so the offset never covers a
            // partially applied chunk.
            if let Err(truncate_err) = file.set_len(offset).await {
                tracing::error!(
                    upload_id = %id,
                    error = %truncate_err,
                    "Failed to truncate data file after a failed write"
                );
            }
            return Err(StorageError::Io(err));
        }

        Ok(offset + data.len() as u64)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_info(&self, id: UploadId) -> StorageResult<UploadInfo> {
        let mut info = sidecar::read_info(&self.root, id).await?;
        info.offset = self.data_len(id).await?;
        Ok(info)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ContentReader for FileStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_reader(&self, id: UploadId) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let file = self.open_data(id).await?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Terminator for FileStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn terminate(&self, id: UploadId) -> StorageResult<()> {
        let had_data = match fs::remove_file(self.data_path(id)).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(StorageError::Io(err)),
        };
        let had_info = sidecar::remove_info(&self.root, id).await?;
        if !had_data && !had_info {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Concatenator for FileStore {
    #[instrument(skip(self, partials), fields(backend = "filesystem", partials = partials.len()))]
    async fn concat_uploads(&self, dest: UploadId, partials: &[UploadId]) -> StorageResult<()> {
        let dest_path = self.data_path(dest);
        let current = self.data_len(dest).await?;
        if current != 0 {
            return Err(StorageError::OffsetMismatch {
                expected: current,
                actual: 0,
            });
        }

        let staging = sidecar::temp_path(&dest_path);
        if let Err(err) = self.assemble(&staging, partials).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&staging, &dest_path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }
}

#[async_trait]
impl Locker for FileStore {
    async fn lock_upload(&self, id: UploadId) -> StorageResult<()> {
        self.locker.lock_upload(id).await
    }

    async fn unlock_upload(&self, id: UploadId) -> StorageResult<()> {
        self.locker.unlock_upload(id).await
    }
}

#[async_trait]
impl LengthDeclarer for FileStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn declare_length(&self, id: UploadId, size: u64) -> StorageResult<()> {
        sidecar::declare_length(&self.root, id, size).await
    }
}
