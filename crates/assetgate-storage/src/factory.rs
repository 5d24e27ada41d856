#[cfg(all(feature = "storage-s3", feature = "storage-local"))]
use crate::FailoverStorage;
#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
#[cfg(not(all(feature = "storage-s3", feature = "storage-local")))]
use crate::StorageError;
use crate::{ConfigResolver, Storage, StorageBackend, StorageResult};
use assetgate_core::StorageConfig;
use std::sync::Arc;

/// Create and initialize the storage backend selected by `config.backend`.
///
/// Single backends fail fast when `init` fails. The failover gateway always
/// initializes; its sides degrade independently.
pub async fn create_storage(config: Arc<StorageConfig>) -> StorageResult<Arc<dyn Storage>> {
    let resolver = Arc::new(ConfigResolver::new(config)?);
    let storage = build_storage(resolver)?;
    storage.init().await?;

    tracing::info!(backend = %storage.backend_type(), "Storage backend ready");
    Ok(storage)
}

/// Construct the configured backend without initializing it.
pub fn build_storage(resolver: Arc<ConfigResolver>) -> StorageResult<Arc<dyn Storage>> {
    let backend = resolver.config().backend;

    match backend {
        #[cfg(feature = "storage-local")]
        StorageBackend::Filesystem => Ok(Arc::new(LocalStorage::from_resolver(&resolver))),

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Filesystem => Err(StorageError::ConfigError(
            "Filesystem storage backend not available (storage-local feature not enabled)"
                .to_string(),
        )),

        #[cfg(feature = "storage-s3")]
        StorageBackend::Cloud => Ok(Arc::new(S3Storage::new(resolver)?)),

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::Cloud => Err(StorageError::ConfigError(
            "Cloud storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(all(feature = "storage-s3", feature = "storage-local"))]
        StorageBackend::CloudWithFallback => {
            let primary = Arc::new(S3Storage::new(resolver.clone())?);
            let fallback = Arc::new(LocalStorage::from_resolver(&resolver));
            Ok(Arc::new(FailoverStorage::new(primary, fallback)))
        }

        #[cfg(not(all(feature = "storage-s3", feature = "storage-local")))]
        StorageBackend::CloudWithFallback => Err(StorageError::ConfigError(
            "Failover storage requires both storage-s3 and storage-local features".to_string(),
        )),
    }
}
