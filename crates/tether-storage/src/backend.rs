//! Storage Abstraction
//!
//! Provides a unified interface for object storage backends.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File does not exist: {0}")]
    FileNotPresent(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("A public url prefix is required to build public urls")]
    MissingPublicUrlPrefix,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage trait - unified interface for storage backends
///
/// Paths are opaque keys. Concurrent writers to the same path are not
/// supported.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store contents at a path, replacing whatever was there
    async fn write(&self, path: &str, contents: Bytes) -> StorageResult<()>;

    /// Store the contents of a local file at a path
    ///
    /// Backends that return `true` from `supports_file_writes` stream the
    /// file. The default implementation buffers it.
    async fn write_from_file(&self, path: &str, file: &Path) -> StorageResult<()> {
        let contents = fs::read(file).await?;
        self.write(path, Bytes::from(contents)).await
    }

    /// Whether `write_from_file` avoids loading the file into memory
    fn supports_file_writes(&self) -> bool {
        false
    }

    /// Retrieve contents, failing with `FileNotPresent` when missing
    async fn read(&self, path: &str) -> StorageResult<Bytes>;

    /// Retrieve contents into a local file
    async fn read_to_file(&self, path: &str, dest: &Path) -> StorageResult<()> {
        let contents = self.read(path).await?;
        fs::write(dest, &contents).await?;
        Ok(())
    }

    /// Delete contents, failing with `FileNotPresent` when missing
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Check if a path exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Public URL for a path
    async fn public_url(&self, path: &str) -> StorageResult<String>;

    /// Copy a path to a new path
    async fn cp(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Move a path to a new path, replacing the destination
    async fn mv(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Get storage name for logging
    fn name(&self) -> &str;
}

/// Join a store directory and a filename into a storage path
pub fn join_path(dir: &str, filename: &str) -> String {
    let absolute = dir.starts_with('/');
    let dir = dir.trim_end_matches('/');
    let filename = filename.trim_start_matches('/');

    if dir.is_empty() && absolute {
        format!("/{}", filename)
    } else if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", dir, filename)
    }
}

/// Basename of a storage path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Directory part of a storage path, `""` for a bare filename
pub fn dirname(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/d", "a.txt"), "/d/a.txt");
        assert_eq!(join_path("/d/", "a.txt"), "/d/a.txt");
        assert_eq!(join_path("/d", "/a.txt"), "/d/a.txt");
        assert_eq!(join_path("", "a.txt"), "a.txt");
        assert_eq!(join_path("/", "a.txt"), "/a.txt");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/store/dir/a.txt"), "/store/dir");
        assert_eq!(dirname("/a.txt"), "/");
        assert_eq!(dirname("dir/a.txt"), "dir");
        assert_eq!(dirname("a.txt"), "");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/store/dir/a.txt"), "a.txt");
        assert_eq!(basename("a.txt"), "a.txt");
    }
}
