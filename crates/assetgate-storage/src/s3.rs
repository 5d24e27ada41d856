use crate::keys::validate_key;
use crate::resolver::ConfigResolver;
use crate::traits::{ObjectHandle, Storage, StorageError, StorageResult, StoredObject};
use crate::urls::{virtual_hosted, Presigner, Provider, UrlGenerator};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, ObjectStore, ObjectStoreExt, PutOptions, PutPayload, Result as ObjectResult,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// S3-compatible object storage, one client per configured bucket.
///
/// Keys are routed to buckets through the [`ConfigResolver`]; URLs come from
/// the [`UrlGenerator`], which also owns presigning.
pub struct S3Storage {
    resolver: Arc<ConfigResolver>,
    stores: BTreeMap<String, Arc<dyn ObjectStore>>,
    urls: Arc<UrlGenerator>,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// Builds a client for every bucket the configuration routes to. No network
    /// traffic happens until [`Storage::init`].
    pub fn new(resolver: Arc<ConfigResolver>) -> StorageResult<Self> {
        let provider = Provider::detect(resolver.endpoint());
        let path_style = resolver.path_style(provider.default_path_style());

        let mut stores: BTreeMap<String, Arc<dyn ObjectStore>> = BTreeMap::new();
        let mut signers = HashMap::new();
        for bucket in resolver.buckets()? {
            let client = build_client(&resolver, bucket, path_style)?;
            signers.insert(bucket.to_string(), client.clone());
            stores.insert(bucket.to_string(), Arc::new(client));
        }

        tracing::debug!(
            provider = %provider,
            path_style = path_style,
            buckets = ?stores.keys().collect::<Vec<_>>(),
            "Configured S3 clients"
        );

        let urls = UrlGenerator::new(resolver.clone())
            .with_presigner(Arc::new(BucketSigners { signers }));

        Ok(S3Storage {
            resolver,
            stores,
            urls: Arc::new(urls),
        })
    }

    /// Build on pre-constructed object stores, keyed by bucket name.
    pub fn with_stores(
        resolver: Arc<ConfigResolver>,
        stores: impl IntoIterator<Item = (String, Arc<dyn ObjectStore>)>,
        presigner: Option<Arc<dyn Presigner>>,
    ) -> Self {
        let urls = UrlGenerator::new(resolver.clone());
        let urls = match presigner {
            Some(presigner) => urls.with_presigner(presigner),
            None => urls,
        };
        S3Storage {
            resolver,
            stores: stores.into_iter().collect(),
            urls: Arc::new(urls),
        }
    }

    pub fn urls(&self) -> &UrlGenerator {
        &self.urls
    }

    fn store_for(&self, bucket: &str) -> StorageResult<&Arc<dyn ObjectStore>> {
        self.stores.get(bucket).ok_or_else(|| {
            StorageError::ConfigError(format!("No client configured for bucket {}", bucket))
        })
    }

    /// Bucket, client and object location responsible for `key`.
    fn route(&self, key: &str) -> StorageResult<(&str, &Arc<dyn ObjectStore>, Path)> {
        let location = object_location(key)?;
        let bucket = self.resolver.bucket_for_key(key)?;
        Ok((bucket, self.store_for(bucket)?, location))
    }

    async fn list_bucket(&self, bucket: &str) -> StorageResult<Vec<Path>> {
        let store = self.store_for(bucket)?;
        let mut listing = store.list(None);
        let mut paths = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| {
                tracing::error!(error = %e, bucket = %bucket, "S3 list failed");
                StorageError::BackendError(e.to_string())
            })?;
            paths.push(meta.location);
        }
        Ok(paths)
    }

    async fn delete_bucket_contents(&self, bucket: &str) -> StorageResult<u64> {
        let store = self.store_for(bucket)?;
        let paths = self.list_bucket(bucket).await?;
        let batch_size = self.resolver.delete_batch_size();
        let mut deleted = 0u64;

        for chunk in paths.chunks(batch_size) {
            let locations = futures::stream::iter(chunk.to_vec().into_iter().map(Ok)).boxed();
            let mut results = store.delete_stream(locations);
            while let Some(result) = results.next().await {
                match result {
                    Ok(_) => deleted += 1,
                    Err(ObjectStoreError::NotFound { .. }) => {}
                    Err(e) => {
                        tracing::error!(error = %e, bucket = %bucket, "S3 batch delete failed");
                        return Err(StorageError::DeleteFailed(e.to_string()));
                    }
                }
            }
            tracing::debug!(bucket = %bucket, batch = chunk.len(), "S3 delete batch complete");
        }

        Ok(deleted)
    }
}

/// Object location for a key, taken verbatim. `validate_key` excludes every
/// character `Path::from` would percent-encode.
fn object_location(key: &str) -> StorageResult<Path> {
    validate_key(key)?;
    Path::parse(key).map_err(|e| StorageError::InvalidKey(format!("{}: {}", key, e)))
}

fn build_client(
    resolver: &ConfigResolver,
    bucket: &str,
    path_style: bool,
) -> StorageResult<AmazonS3> {
    let config = resolver.config();
    let mut builder = AmazonS3Builder::from_env()
        .with_region(resolver.region())
        .with_bucket_name(bucket)
        .with_virtual_hosted_style_request(!path_style);

    if let Some(endpoint) = resolver.endpoint() {
        // Virtual-hosted requests against a custom endpoint need the bucket in the host.
        let endpoint = if path_style {
            endpoint.to_string()
        } else {
            virtual_hosted(endpoint, bucket).unwrap_or_else(|| endpoint.to_string())
        };
        let allow_http = endpoint.starts_with("http://");
        builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
    }

    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    builder
        .build()
        .map_err(|e| StorageError::ConfigError(e.to_string()))
}

/// Presigns through the native S3 clients.
struct BucketSigners {
    signers: HashMap<String, AmazonS3>,
}

#[async_trait]
impl Presigner for BucketSigners {
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<Url> {
        let signer = self.signers.get(bucket).ok_or_else(|| {
            StorageError::ConfigError(format!("No client configured for bucket {}", bucket))
        })?;
        let location = object_location(key)?;
        let url_result: ObjectResult<_> = signer.signed_url(Method::GET, &location, ttl).await;
        url_result.map_err(|e| StorageError::BackendError(e.to_string()))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn init(&self) -> StorageResult<()> {
        let bucket = self.resolver.default_bucket()?;
        let store = self.store_for(bucket)?;
        let start = std::time::Instant::now();

        if let Some(Err(e)) = store.list(None).next().await {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 bucket check failed"
            );
            return Err(StorageError::BackendUnavailable(format!(
                "Bucket {} is not accessible: {}",
                bucket, e
            )));
        }

        tracing::info!(
            bucket = %bucket,
            provider = %self.urls.provider(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 storage initialized"
        );
        Ok(())
    }

    async fn store(
        &self,
        content: Bytes,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        let (bucket, store, location) = self.route(key)?;
        if content.is_empty() {
            return Err(StorageError::EmptyContent(key.to_string()));
        }

        let size = content.len() as u64;
        let mut opts = PutOptions::default();
        if let Some(content_type) = content_type {
            opts.attributes
                .insert(Attribute::ContentType, content_type.to_string().into());
        }

        let start = std::time::Instant::now();
        let result: ObjectResult<_> = store
            .put_opts(&location, PutPayload::from(content), opts)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(StoredObject {
            key: key.to_string(),
            url: self.urls.public_url(key)?,
            size_bytes: size,
        })
    }

    async fn load_as_handle(&self, key: &str) -> StorageResult<ObjectHandle> {
        let (bucket, store, location) = self.route(key)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = store.get(&location).await;
        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let size = result.meta.size as u64;
        let bucket_owned = bucket.to_string();
        let key_owned = key.to_string();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket_owned,
                    key = %key_owned,
                    "S3 stream download error"
                );
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(ObjectHandle::new(key, Some(size), Box::pin(stream)))
    }

    async fn load_as_local_path(&self, _key: &str) -> StorageResult<PathBuf> {
        Err(StorageError::unsupported(
            StorageBackend::Cloud,
            "load_as_local_path",
        ))
    }

    async fn list_all(&self) -> StorageResult<Vec<String>> {
        let mut keys = BTreeSet::new();
        for bucket in self.stores.keys() {
            keys.extend(
                self.list_bucket(bucket)
                    .await?
                    .into_iter()
                    .map(|p| p.to_string()),
            );
        }
        Ok(keys.into_iter().collect())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let (_, store, location) = self.route(key)?;
        match store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }

        let (bucket, store, location) = self.route(key)?;
        let start = std::time::Instant::now();
        let result: ObjectResult<_> = store.delete(&location).await;

        match result {
            Ok(()) => {}
            Err(ObjectStoreError::NotFound { .. }) => return Ok(false),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );
        Ok(true)
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let mut deleted = 0;
        for bucket in self.stores.keys() {
            deleted += self.delete_bucket_contents(bucket).await?;
        }
        tracing::info!(deleted = deleted, "S3 storage cleared");
        Ok(deleted)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.urls.signed_url(key, ttl).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Cloud
    }
}
