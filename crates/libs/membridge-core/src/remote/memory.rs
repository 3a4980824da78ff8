//! In-memory object store.
//!
//! Backs the engine, lock, and leadership tests; shares its map across
//! clones so several "nodes" in a test observe the same bucket.

use super::{ObjectMeta, ObjectStore, RemoteError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().await.insert(key.to_string(), body);
    }

    pub async fn remove(&self, key: &str) {
        self.objects.lock().await.remove(key);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, RemoteError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound { key: key.to_string() })
    }

    async fn put_bytes(&self, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        self.objects.lock().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, RemoteError> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|body| ObjectMeta { size: body.len() as u64 })
            .ok_or_else(|| RemoteError::NotFound { key: key.to_string() })
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64, RemoteError> {
        let body = self.get_bytes(key).await?;
        let len = body.len() as u64;
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| RemoteError::Transport(format!("write {}: {e}", dest.display())))?;
        Ok(len)
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<u64, RemoteError> {
        let body = tokio::fs::read(src)
            .await
            .map_err(|e| RemoteError::Transport(format!("read {}: {e}", src.display())))?;
        let len = body.len() as u64;
        self.insert(key, body).await;
        Ok(len)
    }
}
