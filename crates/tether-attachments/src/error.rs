//! Attachment errors

use tether_storage::StorageError;
use thiserror::Error;

/// Attachment errors
///
/// Storage errors pass through unchanged so callers can match on the
/// backend's own kind (e.g. `StorageError::FileNotPresent`).
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("You must provide a source to read from before trying to write '{0}'")]
    MissingSource(String),
    #[error("Source error: {0}")]
    Source(String),
    #[error("Trying to register a transaction hook but no transaction is currently open")]
    NotInTransaction,
    #[error("Cannot copy '{0}': must be persisted")]
    CannotCopy(String),
    #[error("Processor error: {0}")]
    Processor(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

impl AttachmentError {
    /// Whether the error is a storage operation on a missing object
    pub fn is_file_not_present(&self) -> bool {
        matches!(self, Self::Storage(StorageError::FileNotPresent(_)))
    }
}
