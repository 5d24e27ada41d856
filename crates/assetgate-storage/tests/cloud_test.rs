//! Cloud driver tests against in-memory object stores.
//!
//! Run with: `cargo test -p assetgate-storage --test cloud_test`

use assetgate_storage::{
    ConfigResolver, FailoverStorage, FileCategory, LocalStorage, S3Storage, Storage,
    StorageBackend, StorageError,
};
use assetgate_core::StorageConfig;
use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn resolver() -> Arc<ConfigResolver> {
    let config = StorageConfig {
        backend: StorageBackend::Cloud,
        default_bucket: Some("marketplace".to_string()),
        endpoint: Some("http://minio:9000".to_string()),
        public_endpoint: Some("http://localhost:9000".to_string()),
        ..Default::default()
    };
    Arc::new(ConfigResolver::new(Arc::new(config)).unwrap())
}

fn cloud(resolver: Arc<ConfigResolver>) -> (S3Storage, Arc<InMemory>) {
    let memory = Arc::new(InMemory::new());
    let storage = S3Storage::with_stores(
        resolver,
        [("marketplace".to_string(), memory.clone() as Arc<dyn ObjectStore>)],
        None,
    );
    (storage, memory)
}

#[tokio::test]
async fn test_generated_key_round_trip() {
    let resolver = resolver();
    let (storage, memory) = cloud(resolver.clone());
    storage.init().await.unwrap();

    let key = resolver
        .generate_key(FileCategory::ListingMedia, "123", Some("My Car Photo.JPG"))
        .unwrap();
    assert!(key.starts_with("listings/123/"));
    assert!(key.ends_with("_My_Car_Photo_JPG"));

    let stored = storage
        .store(Bytes::from_static(b"jpeg bytes"), &key, Some("image/jpeg"))
        .await
        .unwrap();
    assert_eq!(
        stored.url,
        format!("http://localhost:9000/marketplace/{}", key)
    );

    let meta = memory.head(&Path::from(key.as_str())).await.unwrap();
    assert_eq!(meta.size as u64, 10);

    let mut stream = storage.load_as_handle(&key).await.unwrap().into_stream();
    let mut content = Vec::new();
    while let Some(chunk) = stream.next().await {
        content.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(content, b"jpeg bytes");
}

#[tokio::test]
async fn test_overwrite_is_last_write_wins() {
    let (storage, _) = cloud(resolver());

    storage
        .store(Bytes::from_static(b"first"), "documents/1/contract", None)
        .await
        .unwrap();
    storage
        .store(Bytes::from_static(b"second"), "documents/1/contract", None)
        .await
        .unwrap();

    assert_eq!(
        storage.load_bytes("documents/1/contract").await.unwrap(),
        Bytes::from_static(b"second")
    );
    assert_eq!(storage.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_public_access_signed_url_is_public_outside_production() {
    let mut config = resolver().config().clone();
    config.public_access = true;
    let resolver = Arc::new(ConfigResolver::new(Arc::new(config)).unwrap());
    let (storage, _) = cloud(resolver);

    let url = storage
        .get_signed_url("listings/1/a", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(url, "http://localhost:9000/marketplace/listings/1/a");
}

#[tokio::test]
async fn test_failover_serves_local_copy_when_cloud_misses() {
    let dir = tempdir().unwrap();
    let (cloud_storage, _) = cloud(resolver());
    let local = LocalStorage::new(dir.path().join("files"), "http://localhost:3000/files");
    local.init().await.unwrap();
    local
        .store(Bytes::from_static(b"legacy"), "avatars/9/me", None)
        .await
        .unwrap();

    let gateway = FailoverStorage::new(Arc::new(cloud_storage), Arc::new(local));
    gateway.init().await.unwrap();

    assert_eq!(
        gateway.load_bytes("avatars/9/me").await.unwrap(),
        Bytes::from_static(b"legacy")
    );
    let path = gateway.load_as_local_path("avatars/9/me").await.unwrap();
    assert!(path.ends_with("avatars/9/me"));

    let stored = gateway
        .store(Bytes::from_static(b"new"), "avatars/9/me", None)
        .await
        .unwrap();
    assert!(stored.url.starts_with("http://localhost:9000/"));

    assert!(gateway.delete("avatars/9/me").await.unwrap());
    assert!(!gateway.exists("avatars/9/me").await.unwrap());
}

#[tokio::test]
async fn test_cloud_only_operations_report_unsupported() {
    let (storage, _) = cloud(resolver());
    let err = storage.load_as_local_path("docs/1/a").await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::UnsupportedOperation {
            backend: StorageBackend::Cloud,
            ..
        }
    ));
}

#[tokio::test]
async fn test_failover_rejects_path_traversal_as_invalid_key() {
    let dir = tempdir().unwrap();
    let (cloud_storage, memory) = cloud(resolver());
    let local = LocalStorage::new(dir.path().join("files"), "http://localhost:3000/files");
    let gateway = FailoverStorage::new(Arc::new(cloud_storage), Arc::new(local));
    gateway.init().await.unwrap();

    for key in ["../../etc/passwd", "docs/a~b%20c"] {
        let err = gateway
            .store(Bytes::from_static(b"x"), key, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)), "{}: {:?}", key, err);
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "INVALID_KEY");
    }

    assert!(!dir.path().join("etc").exists());
    assert!(memory.list(None).next().await.is_none());
    assert!(gateway.list_all().await.unwrap().is_empty());
}
