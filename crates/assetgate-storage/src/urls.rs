//! URL generation
//!
//! One key, three possible URLs:
//!
//! - [`UrlType::Public`]: `{providerBaseUrl}/{key}`
//! - [`UrlType::Signed`]: a presigned, time-limited URL (degrades to public on failure)
//! - [`UrlType::Cdn`]: `{cdnBaseUrl}/{key}`, or public when no CDN is configured
//!
//! The provider is detected once from the configured endpoint and cached,
//! as are base URLs per `(provider, bucket)`.

use crate::keys::validate_key;
use crate::resolver::ConfigResolver;
use crate::traits::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use url::Url;

/// Object storage provider behind the configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    AwsS3,
    Minio,
    Scaleway,
    GoogleCloud,
    AzureBlob,
    Generic,
}

impl Provider {
    /// Infer the provider from an endpoint URL; no endpoint means AWS.
    pub fn detect(endpoint: Option<&str>) -> Self {
        let Some(endpoint) = endpoint else {
            return Provider::AwsS3;
        };
        let endpoint = endpoint.trim_end_matches('/').to_lowercase();

        if endpoint.contains("amazonaws.com") {
            Provider::AwsS3
        } else if endpoint.contains("minio") || endpoint.ends_with(":9000") {
            Provider::Minio
        } else if endpoint.contains("scw.cloud") {
            Provider::Scaleway
        } else if endpoint.contains("storage.googleapis.com") {
            Provider::GoogleCloud
        } else if endpoint.contains("blob.core.windows.net") {
            Provider::AzureBlob
        } else {
            Provider::Generic
        }
    }

    /// Self-hosted S3-compatible deployments (MinIO and unknown endpoints).
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, Provider::Minio | Provider::Generic)
    }

    pub fn default_path_style(&self) -> bool {
        !matches!(self, Provider::AwsS3 | Provider::Scaleway)
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Provider::AwsS3 => write!(f, "aws-s3"),
            Provider::Minio => write!(f, "minio"),
            Provider::Scaleway => write!(f, "scaleway"),
            Provider::GoogleCloud => write!(f, "google-cloud"),
            Provider::AzureBlob => write!(f, "azure-blob"),
            Provider::Generic => write!(f, "generic"),
        }
    }
}

/// Desired access mode for a generated URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlType {
    Public,
    Signed,
    Cdn,
}

impl FromStr for UrlType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(UrlType::Public),
            "signed" => Ok(UrlType::Signed),
            "cdn" => Ok(UrlType::Cdn),
            _ => Err(StorageError::ConfigError(format!("Invalid URL type: {}", s))),
        }
    }
}

/// Native presigning capability of a backend.
#[async_trait]
pub trait Presigner: Send + Sync {
    /// Presigned GET URL for `key` in `bucket`, valid for `ttl`.
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<Url>;
}

/// Builds public, signed and CDN URLs for stored keys.
pub struct UrlGenerator {
    resolver: Arc<ConfigResolver>,
    presigner: Option<Arc<dyn Presigner>>,
    provider: OnceLock<Provider>,
    base_urls: RwLock<HashMap<(Provider, String), String>>,
}

impl UrlGenerator {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        UrlGenerator {
            resolver,
            presigner: None,
            provider: OnceLock::new(),
            base_urls: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_presigner(mut self, presigner: Arc<dyn Presigner>) -> Self {
        self.presigner = Some(presigner);
        self
    }

    pub fn provider(&self) -> Provider {
        *self.provider.get_or_init(|| {
            let provider = Provider::detect(self.resolver.endpoint());
            tracing::debug!(
                provider = %provider,
                endpoint = ?self.resolver.endpoint(),
                "Detected object storage provider"
            );
            provider
        })
    }

    /// Generate a URL of the requested type. `ttl` only applies to signed URLs
    /// and defaults to the configured TTL.
    pub async fn generate_url(
        &self,
        key: &str,
        url_type: UrlType,
        ttl: Option<Duration>,
    ) -> StorageResult<String> {
        match url_type {
            UrlType::Public => self.public_url(key),
            UrlType::Signed => {
                let ttl = ttl.unwrap_or_else(|| self.resolver.signed_url_ttl());
                self.signed_url(key, ttl).await
            }
            UrlType::Cdn => self.cdn_url(key),
        }
    }

    pub fn public_url(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        let bucket = self.resolver.bucket_for_key(key)?;
        Ok(format!("{}/{}", self.base_url(bucket), encode_key(key)))
    }

    pub fn cdn_url(&self, key: &str) -> StorageResult<String> {
        match self.resolver.cdn_base_url() {
            Some(cdn) => {
                validate_key(key)?;
                Ok(format!("{}/{}", cdn.trim_end_matches('/'), encode_key(key)))
            }
            None => self.public_url(key),
        }
    }

    /// Presigned URL for `key`, or the public URL when signing is pointless or fails.
    pub async fn signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let bucket = self.resolver.bucket_for_key(key)?;
        let provider = self.provider();

        if self.resolver.public_access_enabled()
            && provider.is_self_hosted()
            && !self.resolver.is_production()
        {
            tracing::debug!(
                key = %key,
                provider = %provider,
                "Public access enabled, returning public URL instead of signing"
            );
            return self.public_url(key);
        }

        let Some(ref presigner) = self.presigner else {
            tracing::warn!(key = %key, "No presigner configured, returning public URL");
            return self.public_url(key);
        };

        match presigner.presign_get(bucket, key, ttl).await {
            Ok(url) => Ok(self.rewrite_presigned(url, bucket).to_string()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "URL signing failed, falling back to public URL"
                );
                self.public_url(key)
            }
        }
    }

    /// Base URL of a bucket for the detected provider, without trailing slash.
    pub fn base_url(&self, bucket: &str) -> String {
        let provider = self.provider();
        let cache_key = (provider, bucket.to_string());

        if let Ok(cache) = self.base_urls.read() {
            if let Some(url) = cache.get(&cache_key) {
                return url.clone();
            }
        }

        let url = self.compute_base_url(provider, bucket);
        if let Ok(mut cache) = self.base_urls.write() {
            cache.entry(cache_key).or_insert_with(|| url.clone());
        }
        url
    }

    fn compute_base_url(&self, provider: Provider, bucket: &str) -> String {
        let region = self.resolver.region();
        let path_style = self.resolver.path_style(provider.default_path_style());

        match (provider, self.resolver.public_endpoint()) {
            (Provider::AwsS3, _) | (Provider::Minio | Provider::Generic, None) => {
                if path_style {
                    format!("https://s3.{}.amazonaws.com/{}", region, bucket)
                } else {
                    format!("https://{}.s3.{}.amazonaws.com", bucket, region)
                }
            }
            (Provider::Scaleway, _) => {
                if path_style {
                    format!("https://s3.{}.scw.cloud/{}", region, bucket)
                } else {
                    format!("https://{}.s3.{}.scw.cloud", bucket, region)
                }
            }
            (Provider::GoogleCloud, _) => format!("https://storage.googleapis.com/{}", bucket),
            (Provider::AzureBlob, endpoint) => match endpoint {
                Some(endpoint) => format!("{}/{}", endpoint, bucket),
                None => format!("https://{}.blob.core.windows.net", bucket),
            },
            (Provider::Minio | Provider::Generic, Some(endpoint)) => {
                if path_style {
                    format!("{}/{}", endpoint, bucket)
                } else {
                    virtual_hosted(endpoint, bucket)
                        .unwrap_or_else(|| format!("{}/{}", endpoint, bucket))
                }
            }
        }
    }

    /// Point a presigned URL at the externally reachable endpoint.
    ///
    /// Self-hosted providers sign against the internal hostname and may omit the
    /// bucket segment. The query string carries the signature and is never touched.
    fn rewrite_presigned(&self, mut url: Url, bucket: &str) -> Url {
        let provider = self.provider();
        if !provider.is_self_hosted() {
            return url;
        }
        let Some(public) = self.resolver.public_endpoint().and_then(|e| Url::parse(e).ok())
        else {
            return url;
        };
        let Some(public_host) = public.host_str() else {
            return url;
        };

        let path_style = self.resolver.path_style(provider.default_path_style());
        let host = if path_style {
            public_host.to_string()
        } else {
            format!("{}.{}", bucket, public_host)
        };

        let original_host = url.host_str().map(str::to_string);
        // Virtual-hosted signers carry the bucket in the host, path-style ones
        // as the first path segment; the key itself may start with the bucket name.
        let bucket_in_host = original_host
            .as_deref()
            .is_some_and(|h| h.starts_with(&format!("{}.", bucket)));

        if url.set_scheme(public.scheme()).is_err()
            || url.set_host(Some(&host)).is_err()
            || url.set_port(public.port()).is_err()
        {
            tracing::warn!(url = %url, "Could not rewrite presigned URL host");
            return url;
        }

        let base_path = public.path().trim_end_matches('/');
        let path = url.path().to_string();
        let bucket_prefix = format!("/{}", bucket);
        let object_path = match path.strip_prefix(&bucket_prefix) {
            Some(rest) if !bucket_in_host && rest.starts_with('/') => rest.to_string(),
            _ => path.clone(),
        };
        let rewritten = if path_style {
            format!("{}/{}{}", base_path, bucket, object_path)
        } else {
            format!("{}{}", base_path, object_path)
        };
        url.set_path(&rewritten);

        tracing::debug!(
            bucket = %bucket,
            from_host = ?original_host,
            to_host = %host,
            "Rewrote presigned URL for external access"
        );
        url
    }
}

pub(crate) fn virtual_hosted(endpoint: &str, bucket: &str) -> Option<String> {
    let mut url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?.to_string();
    url.set_host(Some(&format!("{}.{}", bucket, host))).ok()?;
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// Percent-encode each key segment, keeping `/` separators.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetgate_core::StorageConfig;

    fn generator(config: StorageConfig) -> UrlGenerator {
        let config = StorageConfig {
            default_bucket: config.default_bucket.or(Some("marketplace".to_string())),
            ..config
        };
        UrlGenerator::new(Arc::new(ConfigResolver::new(Arc::new(config)).unwrap()))
    }

    #[test]
    fn detects_providers() {
        assert_eq!(Provider::detect(None), Provider::AwsS3);
        assert_eq!(
            Provider::detect(Some("https://s3.eu-west-1.amazonaws.com")),
            Provider::AwsS3
        );
        assert_eq!(Provider::detect(Some("http://minio:9000")), Provider::Minio);
        assert_eq!(Provider::detect(Some("http://10.0.0.5:9000/")), Provider::Minio);
        assert_eq!(
            Provider::detect(Some("https://s3.fr-par.scw.cloud")),
            Provider::Scaleway
        );
        assert_eq!(
            Provider::detect(Some("https://storage.googleapis.com")),
            Provider::GoogleCloud
        );
        assert_eq!(
            Provider::detect(Some("https://acct.blob.core.windows.net")),
            Provider::AzureBlob
        );
        assert_eq!(
            Provider::detect(Some("https://objects.example.com")),
            Provider::Generic
        );
    }

    #[test]
    fn aws_public_urls() {
        let urls = generator(StorageConfig {
            region: "eu-west-1".to_string(),
            ..Default::default()
        });
        assert_eq!(
            urls.public_url("listings/1/car").unwrap(),
            "https://marketplace.s3.eu-west-1.amazonaws.com/listings/1/car"
        );

        let urls = generator(StorageConfig {
            region: "eu-west-1".to_string(),
            path_style: Some(true),
            ..Default::default()
        });
        assert_eq!(
            urls.public_url("listings/1/car").unwrap(),
            "https://s3.eu-west-1.amazonaws.com/marketplace/listings/1/car"
        );
    }

    #[test]
    fn self_hosted_public_urls_use_public_endpoint() {
        let urls = generator(StorageConfig {
            endpoint: Some("http://minio:9000".to_string()),
            public_endpoint: Some("http://localhost:9000".to_string()),
            ..Default::default()
        });
        assert_eq!(urls.provider(), Provider::Minio);
        assert_eq!(
            urls.public_url("avatars/7/me").unwrap(),
            "http://localhost:9000/marketplace/avatars/7/me"
        );

        let urls = generator(StorageConfig {
            endpoint: Some("https://objects.example.com".to_string()),
            path_style: Some(false),
            ..Default::default()
        });
        assert_eq!(
            urls.public_url("avatars/7/me").unwrap(),
            "https://marketplace.objects.example.com/avatars/7/me"
        );
    }

    #[test]
    fn other_provider_base_urls() {
        let urls = generator(StorageConfig {
            endpoint: Some("https://s3.fr-par.scw.cloud".to_string()),
            region: "fr-par".to_string(),
            ..Default::default()
        });
        assert_eq!(urls.base_url("b"), "https://b.s3.fr-par.scw.cloud");

        let urls = generator(StorageConfig {
            endpoint: Some("https://storage.googleapis.com".to_string()),
            ..Default::default()
        });
        assert_eq!(urls.base_url("b"), "https://storage.googleapis.com/b");

        let urls = generator(StorageConfig {
            endpoint: Some("https://acct.blob.core.windows.net".to_string()),
            ..Default::default()
        });
        assert_eq!(urls.base_url("b"), "https://acct.blob.core.windows.net/b");
    }

    #[test]
    fn public_url_is_stable_and_contains_key() {
        let urls = generator(StorageConfig::default());
        let key = "listings/123/20260314_092653_My_Car_Photo_JPG";
        let first = urls.public_url(key).unwrap();
        let second = urls.public_url(key).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("marketplace"));
        assert!(first.ends_with(key));
    }

    #[test]
    fn encodes_key_segments() {
        assert_eq!(encode_key("a b/c+d"), "a%20b/c%2Bd");
        assert_eq!(encode_key("plain/key.jpg"), "plain/key.jpg");
    }

    #[test]
    fn cdn_falls_back_to_public() {
        let urls = generator(StorageConfig::default());
        assert_eq!(
            urls.cdn_url("docs/x").unwrap(),
            urls.public_url("docs/x").unwrap()
        );

        let urls = generator(StorageConfig {
            cdn_base_url: Some("https://cdn.example.com".to_string()),
            ..Default::default()
        });
        assert_eq!(
            urls.cdn_url("docs/x").unwrap(),
            "https://cdn.example.com/docs/x"
        );
    }

    #[test]
    fn rejects_invalid_keys() {
        let urls = generator(StorageConfig::default());
        assert!(matches!(
            urls.public_url("../secret"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn signed_without_presigner_degrades_to_public() {
        let urls = generator(StorageConfig::default());
        let signed = urls
            .generate_url("listings/1/a", UrlType::Signed, None)
            .await
            .unwrap();
        assert_eq!(signed, urls.public_url("listings/1/a").unwrap());
    }

    struct FixedPresigner {
        base: &'static str,
        calls: std::sync::atomic::AtomicUsize,
        fail: bool,
    }

    impl FixedPresigner {
        fn new(base: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(FixedPresigner {
                base,
                calls: std::sync::atomic::AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Presigner for FixedPresigner {
        async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> StorageResult<Url> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::BackendError("no credentials".to_string()));
            }
            let raw = self.base.replace("{bucket}", bucket);
            Url::parse(&format!(
                "{}/{}?X-Amz-Expires={}&X-Amz-Signature=abc",
                raw,
                key,
                ttl.as_secs()
            ))
            .map_err(|e| StorageError::BackendError(e.to_string()))
        }
    }

    fn minio_config(public_access: bool, environment: &str) -> StorageConfig {
        StorageConfig {
            endpoint: Some("http://minio:9000".to_string()),
            public_endpoint: Some("http://localhost:9000".to_string()),
            public_access,
            environment: environment.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn public_access_skips_signing_outside_production() {
        let presigner = FixedPresigner::new("http://minio:9000/{bucket}", false);
        let urls = generator(minio_config(true, "development")).with_presigner(presigner.clone());

        let url = urls
            .signed_url("listings/1/a", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:9000/marketplace/listings/1/a");
        assert_eq!(presigner.calls(), 0);
    }

    #[tokio::test]
    async fn production_always_signs() {
        let presigner = FixedPresigner::new("http://minio:9000/{bucket}", false);
        let urls = generator(minio_config(true, "production")).with_presigner(presigner.clone());

        let url = urls
            .signed_url("listings/1/a", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(presigner.calls(), 1);
        assert!(url.starts_with("http://localhost:9000/marketplace/listings/1/a?"));
        assert!(url.contains("X-Amz-Signature=abc"));
        assert!(url.contains("X-Amz-Expires=60"));
    }

    #[tokio::test]
    async fn rewrite_inserts_missing_bucket_segment() {
        let presigner = FixedPresigner::new("http://{bucket}.minio:9000", false);
        let urls = generator(minio_config(false, "development")).with_presigner(presigner);

        let url = urls
            .signed_url("avatars/2/me", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/marketplace/avatars/2/me?"));
    }

    #[tokio::test]
    async fn rewrite_keeps_keys_starting_with_bucket_name() {
        let virtual_hosted = FixedPresigner::new("http://{bucket}.minio:9000", false);
        let urls = generator(minio_config(false, "development")).with_presigner(virtual_hosted);
        let url = urls
            .signed_url("marketplace/1/a", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(
            url.starts_with("http://localhost:9000/marketplace/marketplace/1/a?"),
            "{}",
            url
        );

        let path_style = FixedPresigner::new("http://minio:9000/{bucket}", false);
        let urls = generator(minio_config(false, "development")).with_presigner(path_style);
        let url = urls
            .signed_url("marketplace/1/a", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(
            url.starts_with("http://localhost:9000/marketplace/marketplace/1/a?"),
            "{}",
            url
        );
    }

    #[tokio::test]
    async fn rewrite_to_virtual_hosted_public_endpoint() {
        let presigner = FixedPresigner::new("http://minio:9000/{bucket}", false);
        let urls = generator(StorageConfig {
            path_style: Some(false),
            ..minio_config(false, "development")
        })
        .with_presigner(presigner);

        let url = urls
            .signed_url("marketplace/1/a", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(
            url.starts_with("http://marketplace.localhost:9000/marketplace/1/a?"),
            "{}",
            url
        );
    }

    #[tokio::test]
    async fn aws_presigned_urls_are_untouched() {
        let presigner = FixedPresigner::new("https://{bucket}.s3.us-east-1.amazonaws.com", false);
        let urls = generator(StorageConfig::default()).with_presigner(presigner);

        let url = urls
            .signed_url("documents/9/contract", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(url.starts_with(
            "https://marketplace.s3.us-east-1.amazonaws.com/documents/9/contract?"
        ));
    }

    #[tokio::test]
    async fn signing_failure_degrades_to_public() {
        let presigner = FixedPresigner::new("unused", true);
        let urls = generator(StorageConfig::default()).with_presigner(presigner.clone());

        let url = urls
            .generate_url("documents/9/contract", UrlType::Signed, None)
            .await
            .unwrap();
        assert_eq!(presigner.calls(), 1);
        assert_eq!(url, urls.public_url("documents/9/contract").unwrap());
    }

    #[test]
    fn parses_url_type() {
        assert_eq!("CDN".parse::<UrlType>().unwrap(), UrlType::Cdn);
        assert!("private".parse::<UrlType>().is_err());
    }
}
