//! Assetgate Core Library
//!
//! This crate provides the configuration and shared storage types used by the
//! storage gateway and its tooling. It performs no I/O beyond reading the
//! process environment.

pub mod config;
pub mod storage_types;

// Re-export commonly used types
pub use config::StorageConfig;
pub use storage_types::{FileCategory, StorageBackend};
