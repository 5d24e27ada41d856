use assetgate_core::StorageBackend;
use assetgate_storage::keys::validate_key;
use assetgate_storage::{ConfigResolver, LocalStorage, StorageError, StorageResult, UrlGenerator, UrlType};
use serde::Serialize;
use std::sync::Arc;

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Public or CDN URL for `key` without touching the backend.
pub fn object_url(
    resolver: Arc<ConfigResolver>,
    key: &str,
    url_type: UrlType,
) -> StorageResult<String> {
    validate_key(key)?;
    let cdn_configured = resolver.cdn_base_url().is_some();

    match (resolver.config().backend, url_type) {
        (_, UrlType::Signed) => Err(StorageError::ConfigError(
            "Signed URLs are issued by the storage backend".to_string(),
        )),
        (_, UrlType::Cdn) if cdn_configured => UrlGenerator::new(resolver).cdn_url(key),
        (StorageBackend::Filesystem, _) => Ok(LocalStorage::from_resolver(&resolver).public_url(key)),
        _ => UrlGenerator::new(resolver).public_url(key),
    }
}

/// JSON body printed on failure.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: &'static str,
    pub message: String,
}

impl ErrorReport {
    pub fn from_error(error: &anyhow::Error) -> Self {
        let code = error
            .downcast_ref::<StorageError>()
            .map(StorageError::error_code)
            .unwrap_or("ERROR");
        ErrorReport {
            error: code,
            message: format!("{:#}", error),
        }
    }
}
