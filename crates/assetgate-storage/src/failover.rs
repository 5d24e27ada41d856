//! Primary/fallback composition behind the storage contract.
//!
//! Each operation is attempted at most once per side. A primary failure is
//! logged and swallowed before the fallback is tried; an error reaches the
//! caller only once both sides have been exhausted. Caller errors
//! (`InvalidKey`, `EmptyContent`) are returned as-is without a fallback attempt.

use crate::traits::{ObjectHandle, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct FailoverStorage {
    primary: Arc<dyn Storage>,
    fallback: Arc<dyn Storage>,
}

impl FailoverStorage {
    pub fn new(primary: Arc<dyn Storage>, fallback: Arc<dyn Storage>) -> Self {
        FailoverStorage { primary, fallback }
    }

    pub fn primary(&self) -> &Arc<dyn Storage> {
        &self.primary
    }

    pub fn fallback(&self) -> &Arc<dyn Storage> {
        &self.fallback
    }
}

fn log_primary_failure(operation: &str, key: Option<&str>, error: &StorageError) {
    tracing::warn!(
        operation = operation,
        key = ?key,
        primary = %error,
        "Primary storage failed, trying fallback"
    );
}

/// Error for an operation both sides failed. A malformed request is reported
/// as such rather than as an outage.
fn exhausted(primary: StorageError, fallback: StorageError) -> StorageError {
    if fallback.is_caller_error() {
        fallback
    } else {
        StorageError::unavailable(primary, fallback)
    }
}

#[async_trait]
impl Storage for FailoverStorage {
    /// Never fails; a side that cannot initialize is logged and left degraded.
    async fn init(&self) -> StorageResult<()> {
        if let Err(e) = self.primary.init().await {
            tracing::error!(
                error = %e,
                backend = %self.primary.backend_type(),
                "Primary storage failed to initialize, continuing degraded"
            );
        }
        if let Err(e) = self.fallback.init().await {
            tracing::error!(
                error = %e,
                backend = %self.fallback.backend_type(),
                "Fallback storage failed to initialize, continuing degraded"
            );
        }
        Ok(())
    }

    async fn store(
        &self,
        content: Bytes,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        let primary_err = match self.primary.store(content.clone(), key, content_type).await {
            Ok(stored) => return Ok(stored),
            Err(e) if e.is_caller_error() => return Err(e),
            Err(e) => e,
        };
        log_primary_failure("store", Some(key), &primary_err);

        match self.fallback.store(content, key, content_type).await {
            Ok(stored) => {
                tracing::info!(key = %key, "Stored on fallback storage");
                Ok(stored)
            }
            Err(fallback_err) => {
                tracing::error!(
                    key = %key,
                    primary = %primary_err,
                    fallback = %fallback_err,
                    "Store failed on both primary and fallback storage"
                );
                Err(exhausted(primary_err, fallback_err))
            }
        }
    }

    async fn load_as_handle(&self, key: &str) -> StorageResult<ObjectHandle> {
        let primary_err = match self.primary.load_as_handle(key).await {
            Ok(handle) => return Ok(handle),
            Err(e) if e.is_caller_error() => return Err(e),
            Err(e) => e,
        };
        log_primary_failure("load_as_handle", Some(key), &primary_err);

        match self.fallback.load_as_handle(key).await {
            Ok(handle) => Ok(handle),
            Err(fallback_err) if fallback_err.is_caller_error() => Err(fallback_err),
            Err(fallback_err) => {
                tracing::warn!(
                    key = %key,
                    primary = %primary_err,
                    fallback = %fallback_err,
                    "Object unavailable on both primary and fallback storage"
                );
                Err(StorageError::NotFound(key.to_string()))
            }
        }
    }

    /// Served by the fallback only; cloud primaries have no local paths.
    async fn load_as_local_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.fallback.load_as_local_path(key).await
    }

    /// Fallback contents only.
    async fn list_all(&self) -> StorageResult<Vec<String>> {
        self.fallback.list_all().await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let primary_err = match self.primary.exists(key).await {
            Ok(true) => return Ok(true),
            Ok(false) => None,
            Err(e) if e.is_caller_error() => return Err(e),
            Err(e) => {
                log_primary_failure("exists", Some(key), &e);
                Some(e)
            }
        };

        match (self.fallback.exists(key).await, primary_err) {
            (Ok(found), _) => Ok(found),
            (Err(fallback_err), None) => {
                tracing::warn!(key = %key, error = %fallback_err, "Fallback exists check failed");
                Ok(false)
            }
            (Err(fallback_err), Some(primary_err)) => {
                Err(exhausted(primary_err, fallback_err))
            }
        }
    }

    /// Both sides are attempted for any valid key; true if either removed something.
    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let primary = match self.primary.delete(key).await {
            Err(e) if e.is_caller_error() => return Err(e),
            result => result,
        };
        let fallback = self.fallback.delete(key).await;

        match (primary, fallback) {
            (Ok(a), Ok(b)) => Ok(a || b),
            (Ok(removed), Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Fallback delete failed");
                Ok(removed)
            }
            (Err(e), Ok(removed)) => {
                tracing::warn!(key = %key, error = %e, "Primary delete failed");
                Ok(removed)
            }
            (Err(primary_err), Err(fallback_err)) => {
                tracing::error!(
                    key = %key,
                    primary = %primary_err,
                    fallback = %fallback_err,
                    "Delete failed on both primary and fallback storage"
                );
                Err(exhausted(primary_err, fallback_err))
            }
        }
    }

    /// Clears both sides; failures are logged per side and never surfaced.
    async fn delete_all(&self) -> StorageResult<u64> {
        let mut deleted = 0;
        match self.primary.delete_all().await {
            Ok(n) => deleted += n,
            Err(e) => tracing::error!(error = %e, "Primary delete_all failed"),
        }
        match self.fallback.delete_all().await {
            Ok(n) => deleted += n,
            Err(e) => tracing::error!(error = %e, "Fallback delete_all failed"),
        }
        Ok(deleted)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let primary_err = match self.primary.get_signed_url(key, ttl).await {
            Ok(url) => return Ok(url),
            Err(e) if e.is_caller_error() => return Err(e),
            Err(e) => e,
        };

        if matches!(primary_err, StorageError::UnsupportedOperation { .. }) {
            tracing::debug!(key = %key, "Primary storage cannot sign, using fallback");
            return self.fallback.get_signed_url(key, ttl).await;
        }

        log_primary_failure("get_signed_url", Some(key), &primary_err);
        self.fallback
            .get_signed_url(key, ttl)
            .await
            .map_err(|fallback_err| exhausted(primary_err, fallback_err))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::CloudWithFallback
    }
}
