//! Test helpers: scripted storage drivers that count calls.
//!
//! Run from workspace root: `cargo test -p assetgate-storage`.

#![allow(dead_code)]

use assetgate_storage::keys::validate_key;
use assetgate_storage::{
    ObjectHandle, Storage, StorageBackend, StorageError, StorageResult, StoredObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a scripted driver answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// In-memory store that succeeds.
    Healthy,
    /// Every operation fails with `BackendUnavailable`.
    Down,
    /// Healthy, except signing and local paths are unsupported.
    CannotSign,
}

/// In-memory driver whose failures are scripted up front.
pub struct ScriptedStorage {
    name: &'static str,
    behavior: Behavior,
    objects: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    total: AtomicUsize,
}

impl ScriptedStorage {
    pub fn new(name: &'static str, behavior: Behavior) -> Self {
        ScriptedStorage {
            name,
            behavior,
            objects: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn with_object(self, key: &str, content: &'static [u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from_static(content));
        self
    }

    /// Number of times `operation` was invoked.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    fn record(&self, operation: &'static str) -> StorageResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Down => Err(StorageError::BackendUnavailable(format!(
                "{} is down",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    /// Record a call on `key`, rejecting malformed keys like a real driver.
    fn record_key(&self, operation: &'static str, key: &str) -> StorageResult<()> {
        self.record(operation)?;
        validate_key(key)
    }

    fn url(&self, key: &str) -> String {
        format!("https://{}.example.com/{}", self.name, key)
    }
}

#[async_trait]
impl Storage for ScriptedStorage {
    async fn init(&self) -> StorageResult<()> {
        self.record("init")
    }

    async fn store(
        &self,
        content: Bytes,
        key: &str,
        _content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        self.record_key("store", key)?;
        if content.is_empty() {
            return Err(StorageError::EmptyContent(key.to_string()));
        }
        let size_bytes = content.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), content);
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url(key),
            size_bytes,
        })
    }

    async fn load_as_handle(&self, key: &str) -> StorageResult<ObjectHandle> {
        self.record_key("load_as_handle", key)?;
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let size = content.len() as u64;
        let stream = futures::stream::iter(vec![Ok(content)]);
        Ok(ObjectHandle::new(key, Some(size), Box::pin(stream)))
    }

    async fn load_as_local_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.record_key("load_as_local_path", key)?;
        if self.behavior == Behavior::CannotSign {
            return Err(StorageError::UnsupportedOperation {
                backend: StorageBackend::Cloud,
                operation: "load_as_local_path",
            });
        }
        if self.contains(key) {
            Ok(PathBuf::from("/scripted").join(key))
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }

    async fn list_all(&self) -> StorageResult<Vec<String>> {
        self.record("list_all")?;
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.record_key("exists", key)?;
        Ok(self.contains(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.record_key("delete", key)?;
        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        self.record("delete_all")?;
        let mut objects = self.objects.lock().unwrap();
        let count = objects.len() as u64;
        objects.clear();
        Ok(count)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.record_key("get_signed_url", key)?;
        if self.behavior == Behavior::CannotSign {
            return Err(StorageError::UnsupportedOperation {
                backend: StorageBackend::Cloud,
                operation: "get_signed_url",
            });
        }
        Ok(format!("{}?ttl={}", self.url(key), ttl.as_secs()))
    }

    fn backend_type(&self) -> StorageBackend {
        match self.behavior {
            Behavior::CannotSign => StorageBackend::Cloud,
            _ => StorageBackend::Filesystem,
        }
    }
}
