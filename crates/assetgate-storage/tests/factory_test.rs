//! Config-driven backend selection.
//!
//! Run with: `cargo test -p assetgate-storage --test factory_test`

use assetgate_core::StorageConfig;
use assetgate_storage::{build_storage, create_storage, ConfigResolver, StorageBackend};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

fn config(vars: &[(&str, &str)]) -> Arc<StorageConfig> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(StorageConfig::from_lookup(|name| vars.get(name).cloned()).unwrap())
}

#[tokio::test]
async fn test_filesystem_backend_from_config() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("storage");
    let root_str = root.to_string_lossy().to_string();

    let storage = create_storage(config(&[
        ("STORAGE_BACKEND", "filesystem"),
        ("LOCAL_STORAGE_PATH", root_str.as_str()),
        ("LOCAL_STORAGE_BASE_URL", "http://localhost:8080/files/"),
    ]))
    .await
    .unwrap();

    assert_eq!(storage.backend_type(), StorageBackend::Filesystem);
    assert!(root.is_dir());

    let stored = storage
        .store(Bytes::from_static(b"hello"), "misc/greeting", None)
        .await
        .unwrap();
    assert_eq!(stored.url, "http://localhost:8080/files/misc/greeting");
    assert_eq!(storage.list_all().await.unwrap(), vec!["misc/greeting"]);
}

#[tokio::test]
async fn test_filesystem_signing_secret_from_config() {
    let dir = tempdir().unwrap();
    let root_str = dir.path().to_string_lossy().to_string();

    let storage = create_storage(config(&[
        ("LOCAL_STORAGE_PATH", root_str.as_str()),
        ("LOCAL_URL_SIGNING_SECRET", "0123456789abcdef0123456789abcdef"),
    ]))
    .await
    .unwrap();

    let url = storage
        .get_signed_url("docs/1/a", std::time::Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.contains("?expires="));
    assert!(url.contains("&signature="));
}

#[test]
fn test_cloud_backends_from_config() {
    let cloud = config(&[
        ("STORAGE_BACKEND", "s3"),
        ("S3_BUCKET", "assets"),
        ("S3_ENDPOINT", "http://minio:9000"),
    ]);
    let storage = build_storage(Arc::new(ConfigResolver::new(cloud).unwrap())).unwrap();
    assert_eq!(storage.backend_type(), StorageBackend::Cloud);

    let failover = config(&[
        ("STORAGE_BACKEND", "cloud-with-fallback"),
        ("S3_BUCKET", "assets"),
        ("S3_ENDPOINT", "http://minio:9000"),
    ]);
    let storage = build_storage(Arc::new(ConfigResolver::new(failover).unwrap())).unwrap();
    assert_eq!(storage.backend_type(), StorageBackend::CloudWithFallback);
}

#[test]
fn test_cloud_backend_requires_bucket() {
    let result = StorageConfig::from_lookup(|name| match name {
        "STORAGE_BACKEND" => Some("cloud".to_string()),
        _ => None,
    });
    assert!(result.is_err());
}
