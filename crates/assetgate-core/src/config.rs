//! Configuration module
//!
//! Storage configuration is loaded once at process start and is immutable
//! afterwards. Components receive it by construction (usually behind an `Arc`);
//! reconfiguration requires a restart.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::{FileCategory, StorageBackend};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
const DEFAULT_LOCAL_STORAGE_PATH: &str = "./storage";
const DEFAULT_LOCAL_STORAGE_BASE_URL: &str = "http://localhost:3000/files";
/// S3 DeleteObjects accepts at most 1000 keys per request.
pub const MAX_DELETE_BATCH_SIZE: usize = 1000;
const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Storage gateway configuration
#[derive(Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub environment: String,
    // Cloud object store
    pub default_bucket: Option<String>,
    pub category_buckets: BTreeMap<FileCategory, String>,
    pub endpoint: Option<String>,
    /// Externally reachable endpoint used in generated URLs; falls back to `endpoint`.
    pub public_endpoint: Option<String>,
    pub region: String,
    /// `None` lets the provider decide (virtual-hosted for AWS, path-style for self-hosted).
    pub path_style: Option<bool>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub delete_batch_size: usize,
    // URLs
    pub signed_url_ttl: Duration,
    pub public_access: bool,
    pub cdn_base_url: Option<String>,
    // Keys
    pub key_templates: BTreeMap<FileCategory, String>,
    // Filesystem
    pub local_storage_path: PathBuf,
    pub local_storage_base_url: String,
    pub local_url_signing_secret: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Filesystem,
            environment: "development".to_string(),
            default_bucket: None,
            category_buckets: BTreeMap::new(),
            endpoint: None,
            public_endpoint: None,
            region: DEFAULT_REGION.to_string(),
            path_style: None,
            access_key_id: None,
            secret_access_key: None,
            delete_batch_size: MAX_DELETE_BATCH_SIZE,
            signed_url_ttl: Duration::from_secs(DEFAULT_SIGNED_URL_TTL_SECS),
            public_access: false,
            cdn_base_url: None,
            key_templates: BTreeMap::new(),
            local_storage_path: PathBuf::from(DEFAULT_LOCAL_STORAGE_PATH),
            local_storage_base_url: DEFAULT_LOCAL_STORAGE_BASE_URL.to_string(),
            local_url_signing_secret: None,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("environment", &self.environment)
            .field("default_bucket", &self.default_bucket)
            .field("category_buckets", &self.category_buckets)
            .field("endpoint", &self.endpoint)
            .field("public_endpoint", &self.public_endpoint)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("delete_batch_size", &self.delete_batch_size)
            .field("signed_url_ttl", &self.signed_url_ttl)
            .field("public_access", &self.public_access)
            .field("cdn_base_url", &self.cdn_base_url)
            .field("key_templates", &self.key_templates)
            .field("local_storage_path", &self.local_storage_path)
            .field("local_storage_base_url", &self.local_storage_base_url)
            .field(
                "local_url_signing_secret",
                &self.local_url_signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl StorageConfig {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Filesystem,
        };

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let mut category_buckets = BTreeMap::new();
        let mut key_templates = BTreeMap::new();
        for category in FileCategory::ALL {
            if let Some(bucket) = var(&format!("S3_BUCKET_{}", category.env_suffix())) {
                category_buckets.insert(category, bucket);
            }
            if let Some(template) = var(&format!("KEY_TEMPLATE_{}", category.env_suffix())) {
                key_templates.insert(category, template);
            }
        }

        let endpoint = var("S3_ENDPOINT").map(|e| e.trim_end_matches('/').to_string());
        let public_endpoint =
            var("S3_PUBLIC_ENDPOINT").map(|e| e.trim_end_matches('/').to_string());

        let path_style = var("S3_PATH_STYLE")
            .map(|v| parse_bool("S3_PATH_STYLE", &v))
            .transpose()?;

        let delete_batch_size = match var("S3_DELETE_BATCH_SIZE") {
            Some(v) => parse_positive("S3_DELETE_BATCH_SIZE", &v)? as usize,
            None => MAX_DELETE_BATCH_SIZE,
        }
        .min(MAX_DELETE_BATCH_SIZE);

        let signed_url_ttl = match var("SIGNED_URL_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_positive("SIGNED_URL_TTL_SECS", &v)?),
            None => Duration::from_secs(DEFAULT_SIGNED_URL_TTL_SECS),
        };

        let public_access = var("STORAGE_PUBLIC_ACCESS")
            .map(|v| parse_bool("STORAGE_PUBLIC_ACCESS", &v))
            .transpose()?
            .unwrap_or(false);

        let config = StorageConfig {
            backend,
            environment,
            default_bucket: var("S3_BUCKET"),
            category_buckets,
            endpoint,
            public_endpoint,
            region: var("S3_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            path_style,
            access_key_id: var("S3_ACCESS_KEY_ID"),
            secret_access_key: var("S3_SECRET_ACCESS_KEY"),
            delete_batch_size,
            signed_url_ttl,
            public_access,
            cdn_base_url: var("CDN_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            key_templates,
            local_storage_path: var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORAGE_PATH)),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_BASE_URL.to_string()),
            local_url_signing_secret: var("LOCAL_URL_SIGNING_SECRET"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.backend {
            StorageBackend::Cloud | StorageBackend::CloudWithFallback => {
                if self.default_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using the {} storage backend",
                        self.backend
                    ));
                }
            }
            StorageBackend::Filesystem => {}
        }

        if self.delete_batch_size == 0 {
            return Err(anyhow::anyhow!("S3_DELETE_BATCH_SIZE must be positive"));
        }

        if let Some(ref secret) = self.local_url_signing_secret {
            if secret.len() < MIN_SIGNING_SECRET_LEN {
                return Err(anyhow::anyhow!(
                    "LOCAL_URL_SIGNING_SECRET must be at least {} characters long",
                    MIN_SIGNING_SECRET_LEN
                ));
            }
        }

        for (name, url) in [
            ("S3_ENDPOINT", self.endpoint.as_deref()),
            ("S3_PUBLIC_ENDPOINT", self.public_endpoint.as_deref()),
            ("CDN_BASE_URL", self.cdn_base_url.as_deref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(anyhow::anyhow!("{} must start with http:// or https://", name));
                }
            }
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    /// Configured template for a category, or its built-in default.
    pub fn key_template(&self, category: FileCategory) -> &str {
        self.key_templates
            .get(&category)
            .map(String::as_str)
            .unwrap_or_else(|| category.default_template())
    }

    /// Bucket override for a category, if any.
    pub fn category_bucket(&self, category: FileCategory) -> Option<&str> {
        self.category_buckets.get(&category).map(String::as_str)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, anyhow::Error> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(anyhow::anyhow!("{} must be a boolean, got '{}'", name, value)),
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64, anyhow::Error> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(anyhow::anyhow!("{} must be a positive integer, got '{}'", name, value)),
    }
}
