//! Configuration resolver
//!
//! Single place that answers "which bucket, which endpoint, which TTL" for the
//! drivers and the URL generator. Derived values are memoized; the inputs are
//! immutable so a racing first access only computes the same value twice.

use crate::keys::KeyGenerator;
use crate::traits::{StorageError, StorageResult};
use assetgate_core::{FileCategory, StorageConfig};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub struct ConfigResolver {
    config: Arc<StorageConfig>,
    keys: KeyGenerator,
    base_url: OnceLock<String>,
    public_endpoint: OnceLock<Option<String>>,
}

impl ConfigResolver {
    pub fn new(config: Arc<StorageConfig>) -> StorageResult<Self> {
        let keys = KeyGenerator::new(&config)?;
        Ok(ConfigResolver {
            config,
            keys,
            base_url: OnceLock::new(),
            public_endpoint: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Generate a key for `(category, id, filename)`.
    pub fn generate_key(
        &self,
        category: FileCategory,
        id: &str,
        filename: Option<&str>,
    ) -> StorageResult<String> {
        self.keys.generate_key(category, id, filename)
    }

    pub fn default_bucket(&self) -> StorageResult<&str> {
        self.config
            .default_bucket
            .as_deref()
            .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))
    }

    pub fn bucket_for_category(&self, category: FileCategory) -> StorageResult<&str> {
        match self.config.category_bucket(category) {
            Some(bucket) => Ok(bucket),
            None => self.default_bucket(),
        }
    }

    /// Route an existing key to its bucket via prefix classification.
    pub fn bucket_for_key(&self, key: &str) -> StorageResult<&str> {
        self.bucket_for_category(self.keys.classify(key))
    }

    /// Every distinct bucket the configuration can route to.
    pub fn buckets(&self) -> StorageResult<BTreeSet<&str>> {
        let mut buckets = BTreeSet::new();
        buckets.insert(self.default_bucket()?);
        buckets.extend(self.config.category_buckets.values().map(String::as_str));
        Ok(buckets)
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Endpoint the process uses to reach the object store.
    pub fn endpoint(&self) -> Option<&str> {
        self.config.endpoint.as_deref()
    }

    /// Endpoint external clients use; defaults to the internal endpoint.
    pub fn public_endpoint(&self) -> Option<&str> {
        self.public_endpoint
            .get_or_init(|| {
                self.config
                    .public_endpoint
                    .as_deref()
                    .or(self.config.endpoint.as_deref())
                    .map(|e| e.trim_end_matches('/').to_string())
            })
            .as_deref()
    }

    /// Path-style addressing, unless overridden: `provider_default` comes from the
    /// detected provider.
    pub fn path_style(&self, provider_default: bool) -> bool {
        self.config.path_style.unwrap_or(provider_default)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        self.config.signed_url_ttl
    }

    pub fn public_access_enabled(&self) -> bool {
        self.config.public_access
    }

    pub fn cdn_base_url(&self) -> Option<&str> {
        self.config.cdn_base_url.as_deref()
    }

    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    pub fn delete_batch_size(&self) -> usize {
        self.config.delete_batch_size.max(1)
    }

    /// Base URL serving the filesystem root, without trailing slash.
    pub fn local_base_url(&self) -> &str {
        self.base_url.get_or_init(|| {
            self.config
                .local_storage_base_url
                .trim_end_matches('/')
                .to_string()
        })
    }
}
