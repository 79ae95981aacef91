//! Local filesystem storage

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::LocalStorageConfig;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::backend::{Storage, StorageError, StorageResult};

/// Local filesystem storage
pub struct LocalStorage {
    /// Root directory for storage (paths are used as-is when absent)
    root: Option<PathBuf>,
    /// Base URL for generating public URLs
    public_url_prefix: Option<String>,
    /// Unix mode applied to written files
    permissions: u32,
}

impl LocalStorage {
    /// Create a new local storage rooted at a directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            public_url_prefix: None,
            permissions: 0o644,
        }
    }

    pub fn from_config(config: &LocalStorageConfig) -> Self {
        Self {
            root: config.local_prefix.as_ref().map(PathBuf::from),
            public_url_prefix: config.public_url_prefix.clone(),
            permissions: config.permissions,
        }
    }

    pub fn public_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_url_prefix = Some(prefix.into());
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = mode;
        self
    }

    /// Resolve a key to a full path
    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        // Prevent directory traversal
        if Path::new(key)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::InvalidPath(key.to_string()));
        }

        match &self.root {
            Some(root) => Ok(root.join(key.trim_start_matches('/'))),
            None => Ok(PathBuf::from(key)),
        }
    }

    /// Ensure parent directory exists
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn assert_exists(&self, key: &str, path: &Path) -> StorageResult<()> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(StorageError::FileNotPresent(key.to_string())),
        }
    }

    async fn apply_permissions(&self, path: &Path) -> StorageResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(self.permissions)).await?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    /// Remove directories left empty by a delete, up to the root
    async fn remove_empty_parents(&self, key: &str) -> StorageResult<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };

        let mut dir = Path::new(key.trim_start_matches('/')).parent();
        while let Some(relative) = dir {
            if relative.as_os_str().is_empty() {
                break;
            }

            let full = root.join(relative);
            let mut entries = fs::read_dir(&full).await?;
            if entries.next_entry().await?.is_some() {
                break;
            }

            fs::remove_dir(&full).await?;
            dir = relative.parent();
        }

        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    #[instrument(skip(self, contents), fields(storage = "local"))]
    async fn write(&self, key: &str, contents: Bytes) -> StorageResult<()> {
        let path = self.resolve_path(key)?;
        self.ensure_parent(&path).await?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        self.apply_permissions(&path).await?;

        debug!(path = ?path, size = contents.len(), "File stored");
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn write_from_file(&self, key: &str, file: &Path) -> StorageResult<()> {
        let path = self.resolve_path(key)?;
        self.ensure_parent(&path).await?;

        let size = fs::copy(file, &path).await?;
        self.apply_permissions(&path).await?;

        debug!(path = ?path, size = size, "File stored from local file");
        Ok(())
    }

    fn supports_file_writes(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve_path(key)?;
        self.assert_exists(key, &path).await?;

        Ok(Bytes::from(fs::read(&path).await?))
    }

    async fn read_to_file(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let path = self.resolve_path(key)?;
        self.assert_exists(key, &path).await?;

        fs::copy(&path, dest).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "local"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve_path(key)?;
        self.assert_exists(key, &path).await?;

        fs::remove_file(&path).await?;
        self.remove_empty_parents(key).await?;

        debug!(path = ?path, "File deleted");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve_path(key)?;
        Ok(matches!(fs::metadata(&path).await, Ok(meta) if meta.is_file()))
    }

    async fn public_url(&self, key: &str) -> StorageResult<String> {
        let prefix = self
            .public_url_prefix
            .as_deref()
            .ok_or(StorageError::MissingPublicUrlPrefix)?;

        Ok(format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            key.trim_start_matches('/')
        ))
    }

    async fn cp(&self, src: &str, dst: &str) -> StorageResult<()> {
        let from_path = self.resolve_path(src)?;
        let to_path = self.resolve_path(dst)?;
        self.assert_exists(src, &from_path).await?;

        self.ensure_parent(&to_path).await?;
        fs::copy(&from_path, &to_path).await?;

        Ok(())
    }

    async fn mv(&self, src: &str, dst: &str) -> StorageResult<()> {
        let from_path = self.resolve_path(src)?;
        let to_path = self.resolve_path(dst)?;
        self.assert_exists(src, &from_path).await?;

        self.ensure_parent(&to_path).await?;
        fs::rename(&from_path, &to_path).await?;
        self.remove_empty_parents(src).await?;

        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}
