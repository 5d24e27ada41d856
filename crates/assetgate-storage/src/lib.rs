//! Assetgate Storage Library
//!
//! This crate provides the storage contract and its implementations: a local
//! filesystem driver, an S3-compatible object storage driver and a failover
//! gateway composing the two.
//!
//! # Storage key format
//!
//! Keys are generated from per-category templates (see [`keys`]), e.g.
//! `listings/{id}/{timestamp}_{filename}`. Every backend uses the same layout,
//! and an existing key's category (and so its bucket) is recovered from its
//! prefix.
//!
//! Keys must be relative, must not contain empty, `.` or `..` segments, and
//! must not contain backslashes or control characters.

pub mod factory;
pub mod failover;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod resolver;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod signing;
pub mod traits;
pub mod urls;

// Re-export commonly used types
pub use assetgate_core::{FileCategory, StorageBackend};
pub use factory::{build_storage, create_storage};
pub use failover::FailoverStorage;
pub use keys::KeyGenerator;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use resolver::ConfigResolver;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ObjectHandle, Storage, StorageError, StorageResult, StoredObject};
pub use urls::{Presigner, Provider, UrlGenerator, UrlType};
