//! Attachment state machine
//!
//! One `Attachment` exists per `(column, version)` of a record. It holds
//! the source assigned but not yet written and the path of the last
//! successful write. `changed()` compares the assigned source with the
//! source that produced the current path, by identity.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tether_core::RecordRef;
use tether_storage::{basename, Storage};
use tracing::debug;

use crate::context::{Stash, UploadContext};
use crate::error::{AttachmentError, AttachmentResult};
use crate::pipeline::temp_file;
use crate::settings::Settings;
use crate::source::{SourceHandle, StringSource};
use crate::uploader::{Processed, Uploader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// No path, no source
    Empty,
    /// Source assigned, never written
    Assigned,
    /// Path set and in sync with the source
    Persisted,
    /// Path set, a different source assigned since
    Dirty,
}

/// Read-only view of a persisted object
#[derive(Clone)]
pub struct PersistedFile {
    path: String,
    storage: Arc<dyn Storage>,
}

impl PersistedFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filename(&self) -> &str {
        basename(&self.path)
    }

    pub async fn read(&self) -> AttachmentResult<Bytes> {
        Ok(self.storage.read(&self.path).await?)
    }

    pub async fn exists(&self) -> AttachmentResult<bool> {
        Ok(self.storage.exists(&self.path).await?)
    }

    pub async fn public_url(&self) -> AttachmentResult<String> {
        Ok(self.storage.public_url(&self.path).await?)
    }
}

impl PartialEq for PersistedFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl fmt::Debug for PersistedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedFile")
            .field("path", &self.path)
            .field("storage", &self.storage.name())
            .finish()
    }
}

pub struct Attachment {
    uploader: Arc<Uploader>,
    settings: Settings,
    context: UploadContext,
    source: Option<SourceHandle>,
    source_was: Option<SourceHandle>,
    persisted_path: Option<String>,
    was: Option<PersistedFile>,
    stash: Stash,
}

impl Attachment {
    pub fn new(uploader: Arc<Uploader>, settings: Settings, context: UploadContext) -> Self {
        Self {
            uploader,
            settings,
            context,
            source: None,
            source_was: None,
            persisted_path: None,
            was: None,
            stash: Stash::new(),
        }
    }

    pub fn context(&self) -> &UploadContext {
        &self.context
    }

    pub fn column(&self) -> String {
        self.context.column()
    }

    pub fn version(&self) -> Option<&str> {
        self.context.version.as_deref()
    }

    pub fn uploader(&self) -> &Arc<Uploader> {
        &self.uploader
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn source(&self) -> Option<&SourceHandle> {
        self.source.as_ref()
    }

    pub fn persisted_path(&self) -> Option<&str> {
        self.persisted_path.as_deref()
    }

    /// Data stashed by processors during the last write
    pub fn stash(&self) -> &Stash {
        &self.stash
    }

    pub fn changed(&self) -> bool {
        self.source.is_some() && self.source != self.source_was
    }

    pub fn state(&self) -> AttachmentState {
        match (&self.persisted_path, self.changed()) {
            (None, false) => AttachmentState::Empty,
            (None, true) => AttachmentState::Assigned,
            (Some(_), false) => AttachmentState::Persisted,
            (Some(_), true) => AttachmentState::Dirty,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted_path.is_some()
    }

    pub fn is_blank(&self) -> bool {
        self.persisted_path.is_none() && self.source.is_none()
    }

    /// Assign a new source
    ///
    /// Leaving the persisted state keeps a snapshot of the persisted file,
    /// available from `was()` until the next successful write.
    pub fn assign(&mut self, source: SourceHandle) {
        if self.state() == AttachmentState::Persisted && self.was.is_none() {
            self.was = self.snapshot();
        }
        self.source = Some(source);
    }

    /// Persisted file before the current changes
    pub fn was(&self) -> Option<&PersistedFile> {
        self.was.as_ref()
    }

    /// Seed the persisted path from the record's stored column
    pub fn set_path(&mut self, path: Option<String>) {
        self.persisted_path = path;
        self.source = None;
        self.source_was = None;
        self.was = None;
    }

    pub(crate) fn set_record(&mut self, record: RecordRef) {
        self.context.record = record;
    }

    /// Filename the next write starts from, only computed when changed
    pub fn filename_to_be_assigned(&self) -> Option<String> {
        if !self.changed() {
            return None;
        }

        self.source.as_ref().map(|source| {
            source
                .detected_filename()
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
        })
    }

    /// Run the uploader pipeline without touching storage
    ///
    /// `None` means nothing to write: the attachment is unchanged or a
    /// step halted. A halted attachment stays changed.
    pub async fn prepare(&mut self) -> AttachmentResult<Option<Processed>> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| AttachmentError::MissingSource(self.column()))?;

        let Some(filename) = self.filename_to_be_assigned() else {
            return Ok(None);
        };

        self.stash.clear();
        let uploader = self.uploader.clone();
        let processed = uploader
            .process(&self.settings, &self.context, &mut self.stash, &source, filename)
            .await?;

        if processed.is_none() {
            debug!(column = %self.column(), "Write halted by processor");
        }
        Ok(processed)
    }

    /// Record a successful write of the assigned source
    pub fn finish(&mut self, path: String) {
        self.persisted_path = Some(path);
        self.source_was = self.source.clone();
        self.was = None;
    }

    /// Process and store the assigned source
    ///
    /// Returns the current path when unchanged and `None` when a processor
    /// halted the write.
    pub async fn write(&mut self) -> AttachmentResult<Option<String>> {
        if self.source.is_none() {
            return Err(AttachmentError::MissingSource(self.column()));
        }
        if !self.changed() {
            return Ok(self.persisted_path.clone());
        }

        let Some(processed) = self.prepare().await? else {
            return Ok(None);
        };

        let storage = self.settings.storage();
        let path = processed.store(storage.as_ref()).await?;
        debug!(column = %self.column(), path = %path, "Attachment written");

        self.finish(path.clone());
        Ok(Some(path))
    }

    /// Forget the persisted path and any assigned source
    ///
    /// Storage is left alone; removing the object is the life cycle's job.
    pub fn delete(&mut self) {
        self.persisted_path = None;
        self.source = None;
        self.source_was = None;
        self.was = None;
    }

    pub fn snapshot(&self) -> Option<PersistedFile> {
        self.persisted_path.as_ref().map(|path| PersistedFile {
            path: path.clone(),
            storage: self.settings.storage(),
        })
    }

    pub async fn exists(&self) -> AttachmentResult<bool> {
        match &self.persisted_path {
            Some(path) => Ok(self.settings.storage().exists(path).await?),
            None => Ok(false),
        }
    }

    pub async fn read(&self) -> AttachmentResult<Option<Bytes>> {
        match &self.persisted_path {
            Some(path) => Ok(Some(self.settings.storage().read(path).await?)),
            None => Ok(None),
        }
    }

    pub async fn public_url(&self) -> AttachmentResult<Option<String>> {
        match &self.persisted_path {
            Some(path) => Ok(Some(self.settings.storage().public_url(path).await?)),
            None => Ok(None),
        }
    }

    pub async fn url(&self) -> AttachmentResult<Option<String>> {
        self.public_url().await
    }

    /// Basename of the persisted path
    pub fn filename(&self) -> Option<&str> {
        self.persisted_path.as_deref().map(basename)
    }

    /// Contents of the assigned source
    pub async fn source_data(&self) -> AttachmentResult<Option<Bytes>> {
        match &self.source {
            Some(source) => Ok(Some(source.read().await?)),
            None => Ok(None),
        }
    }

    /// Run `f` with a local temp copy of the persisted file
    ///
    /// The copy keeps the file's extension and is deleted once `f` returns.
    pub async fn with_copy<F, Fut, T>(&self, f: F) -> AttachmentResult<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = AttachmentResult<T>>,
    {
        let path = self
            .persisted_path
            .as_deref()
            .ok_or_else(|| AttachmentError::CannotCopy(self.column()))?;

        let temp = temp_file(basename(path))?;
        self.settings
            .storage()
            .read_to_file(path, temp.path())
            .await?;

        f(temp.path().to_path_buf()).await
    }

    /// Unpersisted attachment holding a copy of the current data
    pub async fn duplicate(&self) -> AttachmentResult<Attachment> {
        let mut copy = Attachment::new(
            self.uploader.clone(),
            self.settings.clone(),
            self.context.clone(),
        );

        if let Some(path) = &self.persisted_path {
            let data = self.settings.storage().read(path).await?;
            copy.assign(SourceHandle::new(StringSource::with_filename(
                data,
                basename(path),
            )));
        } else if let Some(source) = &self.source {
            copy.assign(source.clone());
        }

        Ok(copy)
    }

    /// Blank attachment for the same slot carrying the persisted path
    pub(crate) fn placeholder(&self) -> Attachment {
        let mut blank = Attachment::new(
            self.uploader.clone(),
            self.settings.clone(),
            self.context.clone(),
        );
        blank.persisted_path = self.persisted_path.clone();
        blank
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        match (self.state(), other.state()) {
            (AttachmentState::Persisted, AttachmentState::Persisted) => {
                self.persisted_path == other.persisted_path
            }
            (AttachmentState::Persisted, _) | (_, AttachmentState::Persisted) => false,
            _ => self.source == other.source,
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("column", &self.column())
            .field("state", &self.state())
            .field("persisted_path", &self.persisted_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Flow;
    use tether_storage::{LocalStorage, MemoryStorage};

    fn attachment_with(storage: Arc<dyn Storage>, uploader: Uploader) -> Attachment {
        Attachment::new(
            Arc::new(uploader),
            Settings::new(storage),
            UploadContext::new(RecordRef::new("Post", Some(1)), "file", None),
        )
    }

    fn attachment(storage: Arc<dyn Storage>) -> Attachment {
        attachment_with(
            storage,
            Uploader::builder().store_dir_static("/d").build().unwrap(),
        )
    }

    fn source(value: &'static str, filename: &str) -> SourceHandle {
        SourceHandle::new(StringSource::with_filename(value, filename))
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = attachment(storage.clone());
        assert_eq!(file.state(), AttachmentState::Empty);

        file.assign(source("hello", "a.txt"));
        assert_eq!(file.state(), AttachmentState::Assigned);

        let path = file.write().await.unwrap();
        assert_eq!(path.as_deref(), Some("/d/a.txt"));
        assert_eq!(file.state(), AttachmentState::Persisted);
        assert!(!file.changed());
        assert_eq!(storage.read("/d/a.txt").await.unwrap(), "hello");
        assert_eq!(file.read().await.unwrap().unwrap(), "hello");
        assert_eq!(file.filename(), Some("a.txt"));
    }

    #[tokio::test]
    async fn test_write_without_source() {
        let mut file = attachment(Arc::new(MemoryStorage::new()));
        assert!(matches!(
            file.write().await,
            Err(AttachmentError::MissingSource(column)) if column == "file"
        ));
    }

    #[tokio::test]
    async fn test_unchanged_write_touches_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = attachment(storage.clone());
        file.assign(source("hello", "a.txt"));
        file.write().await.unwrap();
        storage.delete("/d/a.txt").await.unwrap();

        assert_eq!(file.filename_to_be_assigned(), None);
        assert_eq!(file.write().await.unwrap().as_deref(), Some("/d/a.txt"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_generated_filename_without_hints() {
        let mut file = attachment(Arc::new(MemoryStorage::new()));
        file.assign(SourceHandle::new(StringSource::new("anonymous")));

        let name = file.filename_to_be_assigned().unwrap();
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_halt_keeps_state() {
        let storage = Arc::new(MemoryStorage::new());
        let uploader = Uploader::builder()
            .store_dir_static("/d")
            .process_fn(|_bytes, _name, _ctx| Ok(Flow::Halt))
            .build()
            .unwrap();
        let mut file = attachment_with(storage.clone(), uploader);
        file.set_path(Some("/d/old.txt".to_string()));

        file.assign(source("new", "a.txt"));
        assert_eq!(file.write().await.unwrap(), None);

        assert!(file.changed());
        assert_eq!(file.persisted_path(), Some("/d/old.txt"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_was_tracks_first_persisted_value() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = attachment(storage.clone());
        file.assign(source("one", "one.txt"));
        file.write().await.unwrap();

        file.assign(source("two", "two.txt"));
        assert_eq!(file.state(), AttachmentState::Dirty);
        file.assign(source("three", "three.txt"));
        assert_eq!(file.was().map(PersistedFile::path), Some("/d/one.txt"));

        file.write().await.unwrap();
        assert!(file.was().is_none());
        assert_eq!(file.persisted_path(), Some("/d/three.txt"));
    }

    #[tokio::test]
    async fn test_delete_only_clears_memory() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = attachment(storage.clone());
        file.assign(source("hello", "a.txt"));
        file.write().await.unwrap();

        file.delete();

        assert!(file.is_blank());
        assert!(storage.exists("/d/a.txt").await.unwrap());
        assert!(!file.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_equality() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let shared = source("x", "x.txt");

        let mut a = attachment(storage.clone());
        let mut b = attachment(storage.clone());
        a.assign(shared.clone());
        b.assign(shared);
        assert_eq!(a, b);

        b.assign(source("x", "x.txt"));
        assert_ne!(a, b);

        let mut c = attachment(storage.clone());
        let mut d = attachment(storage);
        c.set_path(Some("/d/x.txt".into()));
        d.set_path(Some("/d/x.txt".into()));
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_with_copy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let mut file = attachment(storage);

        let unpersisted = file
            .with_copy(|_| async { Ok::<_, AttachmentError>(()) })
            .await;
        assert!(matches!(unpersisted, Err(AttachmentError::CannotCopy(_))));

        file.assign(source("image bytes", "photo.png"));
        file.write().await.unwrap();

        let (copied, copy_path) = file
            .with_copy(|path| async move {
                let data = tokio::fs::read(&path).await?;
                Ok::<_, AttachmentError>((data, path))
            })
            .await
            .unwrap();

        assert_eq!(copied, b"image bytes");
        assert!(copy_path.to_string_lossy().ends_with(".png"));
        assert!(!copy_path.exists());
    }

    #[tokio::test]
    async fn test_duplicate() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = attachment(storage);
        file.assign(source("hello", "a.txt"));
        file.write().await.unwrap();

        let copy = file.duplicate().await.unwrap();
        assert_eq!(copy.state(), AttachmentState::Assigned);
        assert_eq!(copy.filename_to_be_assigned().as_deref(), Some("a.txt"));
        assert_eq!(copy.source_data().await.unwrap().unwrap(), "hello");
    }
}
