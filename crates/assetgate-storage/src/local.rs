use crate::keys::validate_key;
use crate::resolver::ConfigResolver;
use crate::signing::UrlSigner;
use crate::traits::{ObjectHandle, Storage, StorageError, StorageResult, StoredObject};
use crate::urls::encode_key;
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const TEMP_PREFIX: &str = ".assetgate-";
const TEMP_SUFFIX: &str = ".tmp";
const STORE_ATTEMPTS: u32 = 5;

/// Local filesystem storage implementation
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
    signer: Option<UrlSigner>,
    warned_unsigned: AtomicBool,
}

impl LocalStorage {
    /// Create a new LocalStorage instance. No I/O happens until [`Storage::init`].
    ///
    /// # Arguments
    /// * `root` - Root directory for file storage (e.g., "/var/lib/assetgate/files")
    /// * `base_url` - Base URL serving that directory (e.g., "http://localhost:3000/files")
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        LocalStorage {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: None,
            warned_unsigned: AtomicBool::new(false),
        }
    }

    pub fn from_resolver(resolver: &ConfigResolver) -> Self {
        let config = resolver.config();
        let storage = LocalStorage::new(
            config.local_storage_path.clone(),
            resolver.local_base_url().to_string(),
        );
        match config.local_url_signing_secret {
            Some(ref secret) => storage.with_signing_secret(secret),
            None => storage,
        }
    }

    /// Issue HMAC-signed URLs from `get_signed_url` instead of plain public URLs.
    pub fn with_signing_secret(mut self, secret: &str) -> Self {
        self.signer = Some(UrlSigner::new(secret));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, encode_key(key))
    }

    /// Check the `expires`/`signature` pair of a URL issued by `get_signed_url`.
    ///
    /// Always false when no signing secret is configured.
    pub fn verify_signed_request(&self, key: &str, expires: u64, signature: &str) -> bool {
        match self.signer {
            Some(ref signer) => validate_key(key).is_ok() && signer.verify(key, expires, signature),
            None => false,
        }
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// The key must be lexically relative and the deepest existing ancestor of
    /// the target must canonicalize to a path inside the root, so symlinks
    /// cannot lead writes out of the storage directory.
    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key resolves outside storage directory: {}",
                key
            )));
        }

        let path = self.root.join(relative);
        let root = self.root.canonicalize().map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Storage root {} is not accessible: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut ancestor = path.as_path();
        let existing = loop {
            match ancestor.canonicalize() {
                Ok(canonical) => break canonical,
                Err(_) => match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => {
                        return Err(StorageError::InvalidKey(format!(
                            "Storage key resolves outside storage directory: {}",
                            key
                        )))
                    }
                },
            }
        };

        if !existing.starts_with(&root) {
            tracing::warn!(key = %key, "Rejected storage key escaping the storage root");
            return Err(StorageError::InvalidKey(format!(
                "Storage key resolves outside storage directory: {}",
                key
            )));
        }

        Ok(path)
    }

    /// Path of an existing regular file for `key`.
    async fn existing_file(&self, key: &str) -> StorageResult<(PathBuf, u64)> {
        let path = self.resolve_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((path, meta.len())),
            Ok(_) => Err(StorageError::NotFound(key.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!(
                "Failed to stat file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Every stored file under the root as `(key, path)`, skipping in-flight temp files.
    async fn walk(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                match self.key_for(&path) {
                    Some(key) => found.push((key, path)),
                    None => tracing::debug!(path = %path.display(), "Skipping non UTF-8 path"),
                }
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(segments.join("/"))
    }

    /// Write `content` to a temp file in `dir`, then rename it over `path`.
    async fn write_atomic(&self, dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
        let temp = dir.join(format!("{}{}{}", TEMP_PREFIX, Uuid::new_v4(), TEMP_SUFFIX));
        let write = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            fs::rename(&temp, path).await
        };
        let result = write.await;
        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result
    }

    /// Remove empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Failed to create storage directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let meta = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Storage directory {} is not accessible: {}",
                self.root.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(StorageError::BackendUnavailable(format!(
                "Storage root {} is not a directory",
                self.root.display()
            )));
        }

        if self.signer.is_none() {
            tracing::info!(
                root = %self.root.display(),
                "Local storage initialized; signed URLs are unsigned public URLs"
            );
        } else {
            tracing::info!(root = %self.root.display(), "Local storage initialized");
        }
        Ok(())
    }

    async fn store(
        &self,
        content: Bytes,
        key: &str,
        _content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        let path = self.resolve_path(key)?;
        if content.is_empty() {
            return Err(StorageError::EmptyContent(key.to_string()));
        }

        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let start = std::time::Instant::now();

        // A concurrent delete may prune `parent` before the temp file exists in
        // it; recreate the directories and retry in that case.
        let mut attempt = 1;
        loop {
            let result = match fs::create_dir_all(&parent).await {
                Ok(()) => {
                    // Re-check once the directories exist; a symlinked parent is only visible now.
                    self.resolve_path(key)?;
                    self.write_atomic(&parent, &path, &content).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < STORE_ATTEMPTS => {
                    tracing::debug!(
                        key = %key,
                        attempt = attempt,
                        "Storage directory removed during store, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    return Err(StorageError::UploadFailed(format!(
                        "Failed to write file {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = content.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            size_bytes: content.len() as u64,
        })
    }

    async fn load_as_handle(&self, key: &str) -> StorageResult<ObjectHandle> {
        let (path, size) = self.existing_file(key).await?;

        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to open file {}: {}",
                path.display(),
                e
            )),
        })?;

        let key_owned = key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(key = %key_owned, error = %e, "Local storage read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        tracing::debug!(key = %key, size_bytes = size, "Local storage opened object");
        Ok(ObjectHandle::new(key, Some(size), Box::pin(stream)))
    }

    async fn load_as_local_path(&self, key: &str) -> StorageResult<PathBuf> {
        let (path, _) = self.existing_file(key).await?;
        Ok(path)
    }

    async fn list_all(&self) -> StorageResult<Vec<String>> {
        Ok(self.walk().await?.into_iter().map(|(key, _)| key).collect())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.existing_file(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve_path(key)?;

        // Only regular files are objects; a directory key has nothing to delete.
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to stat file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                tracing::info!(path = %path.display(), key = %key, "Local storage delete successful");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let files = self.walk().await?;
        let count = files.len() as u64;

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            if let Err(e) = result {
                if e.kind() != ErrorKind::NotFound {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        tracing::info!(root = %self.root.display(), deleted = count, "Local storage cleared");
        Ok(count)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.resolve_path(key)?;
        let url = self.public_url(key);

        match self.signer {
            Some(ref signer) => {
                let expires = UrlSigner::expiry_from_now(ttl);
                let signature = signer.sign(key, expires)?;
                Ok(format!("{}?expires={}&signature={}", url, expires, signature))
            }
            None => {
                if !self.warned_unsigned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "LOCAL_URL_SIGNING_SECRET not set; filesystem signed URLs do not expire"
                    );
                }
                Ok(url)
            }
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Filesystem
    }
}
