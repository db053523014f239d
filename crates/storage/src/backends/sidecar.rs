//! `<id>.info` JSON sidecar files shared by the on-disk backends.

use crate::error::{StorageError, StorageResult};
use hopper_core::{UploadId, UploadInfo};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub(crate) fn info_path(dir: &Path, id: UploadId) -> PathBuf {
    dir.join(format!("{id}.info"))
}

/// Temp path next to `path`, unique per call so concurrent writers never
/// share a staging file.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let suffix = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), suffix))
            .unwrap_or_else(|| suffix.clone()),
    )
}

/// Write the record atomically: temp file, fsync, rename.
pub(crate) async fn write_info(dir: &Path, info: &UploadInfo) -> StorageResult<()> {
    let path = info_path(dir, info.id);
    let temp = temp_path(&path);
    let data = info.to_json()?;

    let result = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&temp, &path).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(StorageError::Io(err));
    }
    Ok(())
}

pub(crate) async fn read_info(dir: &Path, id: UploadId) -> StorageResult<UploadInfo> {
    let data = fs::read(info_path(dir, id))
        .await
        .map_err(|e| StorageError::from_io(id, e))?;
    let info = UploadInfo::from_json(&data)?;
    if info.id != id {
        return Err(StorageError::Corrupt(format!(
            "sidecar for {id} records id {}",
            info.id
        )));
    }
    Ok(info)
}

/// Remove the sidecar. Returns false when it did not exist.
pub(crate) async fn remove_info(dir: &Path, id: UploadId) -> StorageResult<bool> {
    match fs::remove_file(info_path(dir, id)).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::Io(err)),
    }
}

/// Fix the size of a deferred upload in its sidecar.
pub(crate) async fn declare_length(dir: &Path, id: UploadId, size: u64) -> StorageResult<()> {
    let mut info = read_info(dir, id).await?;
    info.size = size;
    info.size_is_deferred = false;
    write_info(dir, &info).await
}
