// Capability contract tests.
// Every shipped backend must behave identically through the composed store.

mod common;

use bytes::Bytes;
use common::{ALL_BACKENDS, open_store, seeded_bytes};
use futures::TryStreamExt;
use hopper_core::{UploadId, UploadInfo};
use hopper_storage::{ComposedStore, StorageError};

async fn read_all(store: &ComposedStore, id: UploadId) -> Vec<u8> {
    let stream = store.reader().unwrap().get_reader(id).await.unwrap();
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn test_every_backend_offers_all_capabilities() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let caps = store.capabilities();
        assert!(caps.reader, "{kind:?}");
        assert!(caps.locker, "{kind:?}");
        assert!(caps.terminator, "{kind:?}");
        assert!(caps.concatenator, "{kind:?}");
        assert!(caps.length_declarer, "{kind:?}");
        store.core().health_check().await.unwrap();
    }
}

#[tokio::test]
async fn test_sequential_writes_accumulate() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let data = seeded_bytes(7, 300_000);
        let info = UploadInfo::new(UploadId::new(), data.len() as u64);
        store.core().create_upload(&info).await.unwrap();

        let mut offset = 0u64;
        for piece in data.chunks(70_000) {
            offset = store
                .core()
                .write_chunk(info.id, offset, Bytes::copy_from_slice(piece))
                .await
                .unwrap();
        }

        let read = store.core().get_info(info.id).await.unwrap();
        assert_eq!(read.offset, data.len() as u64, "{kind:?}");
        assert!(read.is_complete(), "{kind:?}");
        assert_eq!(read_all(&store, info.id).await, data.to_vec(), "{kind:?}");
    }
}

#[tokio::test]
async fn test_stale_offset_is_rejected() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let info = UploadInfo::new(UploadId::new(), 10);
        store.core().create_upload(&info).await.unwrap();
        store
            .core()
            .write_chunk(info.id, 0, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        let result = store
            .core()
            .write_chunk(info.id, 0, Bytes::from_static(b"zz"))
            .await;
        assert!(
            matches!(result, Err(StorageError::OffsetMismatch { expected: 4, actual: 0 })),
            "{kind:?}: {result:?}"
        );
        assert_eq!(read_all(&store, info.id).await, b"abcd", "{kind:?}");
    }
}

#[tokio::test]
async fn test_empty_write_is_noop() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let info = UploadInfo::new(UploadId::new(), 3);
        store.core().create_upload(&info).await.unwrap();

        let offset = store
            .core()
            .write_chunk(info.id, 0, Bytes::new())
            .await
            .unwrap();
        assert_eq!(offset, 0, "{kind:?}");
    }
}

#[tokio::test]
async fn test_metadata_is_returned_verbatim() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let mut info = UploadInfo::new(UploadId::new(), 1);
        info.metadata
            .insert("filename".to_string(), "résumé.pdf".to_string());
        info.metadata.insert("empty".to_string(), String::new());
        info.is_partial = true;
        store.core().create_upload(&info).await.unwrap();

        let read = store.core().get_info(info.id).await.unwrap();
        assert_eq!(read.metadata, info.metadata, "{kind:?}");
        assert!(read.is_partial, "{kind:?}");
        assert_eq!(read.created_at, info.created_at, "{kind:?}");
    }
}

#[tokio::test]
async fn test_unknown_upload_is_not_found() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let id = UploadId::new();

        assert!(matches!(
            store.core().get_info(id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.core().write_chunk(id, 0, Bytes::from_static(b"x")).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.reader().unwrap().get_reader(id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.terminator().unwrap().terminate(id).await,
            Err(StorageError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_terminate_removes_everything() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let info = UploadInfo::new(UploadId::new(), 2);
        store.core().create_upload(&info).await.unwrap();
        store
            .core()
            .write_chunk(info.id, 0, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        store.terminator().unwrap().terminate(info.id).await.unwrap();
        assert!(matches!(
            store.core().get_info(info.id).await,
            Err(StorageError::NotFound(_))
        ));

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(&info.id.to_string()))
            .collect();
        assert!(remaining.is_empty(), "{kind:?}: {remaining:?}");
    }
}

#[tokio::test]
async fn test_concat_orders_partials() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let a = UploadInfo::new(UploadId::new(), 3);
        let b = UploadInfo::new(UploadId::new(), 4);
        let dest = UploadInfo::new(UploadId::new(), 7);
        for info in [&a, &b, &dest] {
            store.core().create_upload(info).await.unwrap();
        }
        store
            .core()
            .write_chunk(a.id, 0, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        store
            .core()
            .write_chunk(b.id, 0, Bytes::from_static(b"defg"))
            .await
            .unwrap();

        store
            .concatenator()
            .unwrap()
            .concat_uploads(dest.id, &[b.id, a.id])
            .await
            .unwrap();

        assert_eq!(store.core().get_info(dest.id).await.unwrap().offset, 7);
        assert_eq!(read_all(&store, dest.id).await, b"defgabc", "{kind:?}");
        // Partials are left intact.
        assert_eq!(read_all(&store, a.id).await, b"abc", "{kind:?}");
    }
}

#[tokio::test]
async fn test_declare_length_fixes_size() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let info = UploadInfo::deferred(UploadId::new());
        store.core().create_upload(&info).await.unwrap();
        store
            .core()
            .write_chunk(info.id, 0, Bytes::from_static(b"xyz"))
            .await
            .unwrap();

        store
            .length_declarer()
            .unwrap()
            .declare_length(info.id, 3)
            .await
            .unwrap();

        let read = store.core().get_info(info.id).await.unwrap();
        assert!(!read.size_is_deferred, "{kind:?}");
        assert_eq!(read.size, 3, "{kind:?}");
        assert!(read.is_complete(), "{kind:?}");
    }
}

#[tokio::test]
async fn test_locker_is_exclusive_and_idempotent() {
    for kind in ALL_BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(kind, dir.path()).await;
        let locker = store.locker().unwrap();
        let id = UploadId::new();

        locker.lock_upload(id).await.unwrap();
        assert!(matches!(
            locker.lock_upload(id).await,
            Err(StorageError::Locked(_))
        ));
        locker.unlock_upload(id).await.unwrap();
        locker.unlock_upload(id).await.unwrap();
        locker.lock_upload(id).await.unwrap();
        locker.unlock_upload(id).await.unwrap();
    }
}
