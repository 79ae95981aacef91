//! Runtime settings injected into attachments and life cycles

use std::fmt;
use std::sync::Arc;

use tether_core::TetherConfig;
use tether_storage::Storage;

use crate::error::{AttachmentError, AttachmentResult};

/// Resolves the storage backend at the moment it is needed
#[derive(Clone)]
pub struct StorageProvider(Arc<dyn Fn() -> Arc<dyn Storage> + Send + Sync>);

impl StorageProvider {
    /// Always the same backend
    pub fn fixed(storage: Arc<dyn Storage>) -> Self {
        Self(Arc::new(move || storage.clone()))
    }

    /// Backend chosen on every call
    pub fn lazy<F>(provider: F) -> Self
    where
        F: Fn() -> Arc<dyn Storage> + Send + Sync + 'static,
    {
        Self(Arc::new(provider))
    }

    pub fn get(&self) -> Arc<dyn Storage> {
        (self.0)()
    }
}

impl fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StorageProvider")
            .field(&self.get().name())
            .finish()
    }
}

/// Settings for one set of attachments
#[derive(Clone, Debug)]
pub struct Settings {
    pub storage: StorageProvider,
    /// When false, processors are skipped and content is stored verbatim
    pub processing_enabled: bool,
    /// Upload worker budget per life-cycle operation (`None` = unbounded)
    pub concurrent_workers: Option<usize>,
}

impl Settings {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage: StorageProvider::fixed(storage),
            processing_enabled: true,
            concurrent_workers: None,
        }
    }

    pub fn from_config(config: &TetherConfig, storage: StorageProvider) -> AttachmentResult<Self> {
        config
            .validate()
            .map_err(|e| AttachmentError::Configuration(e.to_string()))?;

        Ok(Self {
            storage,
            processing_enabled: config.processing_enabled,
            concurrent_workers: config.concurrent_workers,
        })
    }

    pub fn with_storage(mut self, storage: StorageProvider) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_processing(mut self, enabled: bool) -> Self {
        self.processing_enabled = enabled;
        self
    }

    pub fn with_concurrent_workers(mut self, workers: Option<usize>) -> Self {
        self.concurrent_workers = workers;
        self
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.get()
    }
}
