//! Storage abstraction trait
//!
//! This module defines the Storage trait that every driver and the failover
//! gateway implement, together with the error taxonomy that crosses it.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
///
/// Backend-specific failures are converted into these variants inside each
/// driver; callers never see SDK error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Refusing to store empty content for key: {0}")]
    EmptyContent(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    UnsupportedOperation {
        backend: StorageBackend,
        operation: &'static str,
    },

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Storage unavailable: primary failed ({primary}); fallback failed ({fallback})")]
    StorageUnavailable {
        primary: Box<StorageError>,
        fallback: Box<StorageError>,
    },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub(crate) fn unsupported(backend: StorageBackend, operation: &'static str) -> Self {
        StorageError::UnsupportedOperation { backend, operation }
    }

    pub(crate) fn unavailable(primary: StorageError, fallback: StorageError) -> Self {
        StorageError::StorageUnavailable {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }

    /// HTTP status an endpoint should answer with for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            StorageError::NotFound(_) => 404,
            StorageError::InvalidKey(_) | StorageError::EmptyContent(_) => 400,
            StorageError::UnsupportedOperation { .. } => 501,
            StorageError::BackendUnavailable(_) | StorageError::StorageUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// Machine-readable error code (e.g., "NOT_FOUND")
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::InvalidKey(_) => "INVALID_KEY",
            StorageError::EmptyContent(_) => "EMPTY_CONTENT",
            StorageError::NotFound(_) => "NOT_FOUND",
            StorageError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            StorageError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            StorageError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            StorageError::UploadFailed(_) => "UPLOAD_FAILED",
            StorageError::DownloadFailed(_) => "DOWNLOAD_FAILED",
            StorageError::DeleteFailed(_) => "DELETE_FAILED",
            StorageError::BackendError(_) => "BACKEND_ERROR",
            StorageError::IoError(_) => "IO_ERROR",
            StorageError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// The request itself is malformed; no backend would accept it.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidKey(_) | StorageError::EmptyContent(_)
        )
    }

    /// Caller errors are not worth retrying; everything else may succeed later.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            StorageError::InvalidKey(_)
                | StorageError::EmptyContent(_)
                | StorageError::NotFound(_)
                | StorageError::UnsupportedOperation { .. }
                | StorageError::ConfigError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Lazily-polled object content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Access reference returned by a successful store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredObject {
    pub key: String,
    /// Public URL of the object on the backend that accepted the write.
    pub url: String,
    pub size_bytes: u64,
}

/// Readable handle to a stored object. Nothing is read until the stream is polled.
pub struct ObjectHandle {
    key: String,
    size: Option<u64>,
    stream: ByteStream,
}

impl ObjectHandle {
    pub fn new(key: impl Into<String>, size: Option<u64>, stream: ByteStream) -> Self {
        ObjectHandle {
            key: key.into(),
            size,
            stream,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object size when the backend reported it up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Drain the stream into memory.
    pub async fn bytes(self) -> StorageResult<Bytes> {
        let mut buffer = match self.size {
            Some(size) => BytesMut::with_capacity(size as usize),
            None => BytesMut::new(),
        };
        let mut stream = self.stream;
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("key", &self.key)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Storage abstraction trait
///
/// Implemented by the filesystem driver, the cloud object driver and the
/// failover gateway. Callers hold an `Arc<dyn Storage>` and never learn which
/// of them they are talking to.
///
/// Operations run to completion on the calling task; no implementation spawns
/// background work. Concurrent `store` calls on one key are last-write-wins.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Validate the backend is usable and perform one-time setup.
    ///
    /// Fails with `BackendUnavailable` when validation fails.
    async fn init(&self) -> StorageResult<()>;

    /// Write `content` under `key`, overwriting any previous object.
    ///
    /// Rejects empty content with `EmptyContent` and keys that escape the
    /// backend root with `InvalidKey`. Missing parent structure is created.
    async fn store(
        &self,
        content: Bytes,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject>;

    /// Open the object for reading; `NotFound` if absent.
    async fn load_as_handle(&self, key: &str) -> StorageResult<ObjectHandle>;

    /// Local filesystem path of the object. Cloud backends return `UnsupportedOperation`.
    async fn load_as_local_path(&self, key: &str) -> StorageResult<PathBuf>;

    /// Best-effort enumeration of stored keys.
    async fn list_all(&self) -> StorageResult<Vec<String>>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete an object; `Ok(false)` when there was nothing to delete.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Remove every object on the backend and return how many were removed.
    ///
    /// Cleanup/test tooling only.
    async fn delete_all(&self) -> StorageResult<u64>;

    /// Time-limited access URL. Backends that cannot sign return `UnsupportedOperation`.
    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Load the whole object into memory.
    async fn load_bytes(&self, key: &str) -> StorageResult<Bytes> {
        self.load_as_handle(key).await?.bytes().await
    }
}
