//! In-memory storage

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{Storage, StorageError, StorageResult};

/// In-memory storage for testing
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
    public_url_prefix: String,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_public_url_prefix("/memory")
    }

    pub fn with_public_url_prefix(prefix: impl Into<String>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            public_url_prefix: prefix.into(),
        }
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// All stored paths, sorted
    pub async fn paths(&self) -> Vec<String> {
        let files = self.files.read().await;
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&self, path: &str, contents: Bytes) -> StorageResult<()> {
        let mut files = self.files.write().await;
        debug!(path = %path, size = contents.len(), storage = "memory", "File stored");
        files.insert(path.to_string(), contents);
        Ok(())
    }

    async fn read(&self, path: &str) -> StorageResult<Bytes> {
        let files = self.files.read().await;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::FileNotPresent(path.to_string()))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::FileNotPresent(path.to_string()))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let files = self.files.read().await;
        Ok(files.contains_key(path))
    }

    async fn public_url(&self, path: &str) -> StorageResult<String> {
        Ok(format!(
            "{}/{}",
            self.public_url_prefix.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    async fn cp(&self, src: &str, dst: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        let data = files
            .get(src)
            .cloned()
            .ok_or_else(|| StorageError::FileNotPresent(src.to_string()))?;
        files.insert(dst.to_string(), data);
        Ok(())
    }

    async fn mv(&self, src: &str, dst: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        let data = files
            .remove(src)
            .ok_or_else(|| StorageError::FileNotPresent(src.to_string()))?;
        files.insert(dst.to_string(), data);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
