//! Object-store adapter.
//!
//! The sync engine talks to the S3-compatible store through the
//! [`ObjectStore`] trait so tests can substitute [`memory::MemoryObjectStore`]
//! for the real [`s3::S3ObjectStore`]. Errors are classified into three kinds
//! the callers care about: **not-found**, **transport**, and **server**.
//! This layer performs no retries; callers choose policy.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

pub mod keys;
pub mod memory;
pub mod s3;

pub use s3::{S3ObjectStore, StoreConfig};

/// Classified object-store failure.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The requested key does not exist.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The store could not be reached or the request never completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with an error.
    #[error("server error: {0}")]
    Server(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// Metadata returned by a head request.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub size: u64,
}

/// Typed get/put/head/download/upload against one bucket.
#[allow(async_fn_in_trait)]
pub trait ObjectStore: Send + Sync {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, RemoteError>;
    async fn put_bytes(&self, key: &str, body: Vec<u8>) -> Result<(), RemoteError>;
    async fn head(&self, key: &str) -> Result<ObjectMeta, RemoteError>;
    /// Download an object to a local path, returning the byte count.
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, RemoteError>;
    /// Upload a local file, returning the byte count.
    async fn upload(&self, src: &Path, key: &str) -> Result<u64, RemoteError>;
}

/// Fetch an object and decode it as UTF-8 text.
pub async fn get_text<S: ObjectStore>(store: &S, key: &str) -> Result<String, RemoteError> {
    let bytes = store.get_bytes(key).await?;
    String::from_utf8(bytes).map_err(|e| RemoteError::Server(format!("invalid utf-8 at {key}: {e}")))
}

/// Fetch an object and decode it as JSON.
pub async fn get_json<S: ObjectStore, T: DeserializeOwned>(
    store: &S,
    key: &str,
) -> Result<T, RemoteError> {
    let bytes = store.get_bytes(key).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RemoteError::Server(format!("invalid json at {key}: {e}")))
}

/// Store a value as pretty-printed JSON (2-space indent, the wire format
/// every human-readable object uses).
pub async fn put_json_pretty<S: ObjectStore, T: Serialize>(
    store: &S,
    key: &str,
    value: &T,
) -> Result<(), RemoteError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| RemoteError::Server(format!("serialize for {key}: {e}")))?;
    store.put_bytes(key, body).await
}
