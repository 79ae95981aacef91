//! Attachment sources
//!
//! A source is anything that can yield the bytes of a file to attach.
//! Change detection compares sources by identity, never by contents, so
//! sources are passed around as `SourceHandle`s.

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AttachmentError, AttachmentResult};

/// Readable byte provider with optional filename hints
#[async_trait]
pub trait Source: Send + Sync {
    /// Read the whole contents
    async fn read(&self) -> AttachmentResult<Bytes>;

    /// Explicit filename hint
    fn filename(&self) -> Option<String> {
        None
    }

    /// Filename the content had on the client side
    fn original_filename(&self) -> Option<String> {
        None
    }

    /// Path-like hint (local path, URL path)
    fn path(&self) -> Option<String> {
        None
    }

    /// Local file holding the contents, when the source is file backed
    fn local_file(&self) -> Option<&Path> {
        None
    }

    /// Copy the contents into a local file
    async fn copy_to(&self, dest: &Path) -> AttachmentResult<()> {
        let contents = self.read().await?;
        fs::write(dest, &contents).await?;
        Ok(())
    }
}

/// Shared source compared by identity
#[derive(Clone)]
pub struct SourceHandle(Arc<dyn Source>);

impl SourceHandle {
    pub fn new(source: impl Source + 'static) -> Self {
        Self(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn Source>) -> Self {
        Self(source)
    }

    /// Filename detected from the source hints
    ///
    /// Looks at `filename`, then `original_filename`, then the basename of
    /// `path`. Empty values are skipped.
    pub fn detected_filename(&self) -> Option<String> {
        non_empty(self.0.filename())
            .or_else(|| non_empty(self.0.original_filename()))
            .or_else(|| {
                non_empty(self.0.path()).and_then(|p| {
                    Path::new(&p)
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map(str::to_string)
                })
            })
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl Eq for SourceHandle {}

impl Deref for SourceHandle {
    type Target = dyn Source;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceHandle")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// In-memory contents with an optional filename
#[derive(Debug, Clone)]
pub struct StringSource {
    value: Bytes,
    filename: Option<String>,
}

impl StringSource {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            filename: None,
        }
    }

    pub fn with_filename(value: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            filename: Some(filename.into()),
        }
    }
}

#[async_trait]
impl Source for StringSource {
    async fn read(&self) -> AttachmentResult<Bytes> {
        Ok(self.value.clone())
    }

    fn original_filename(&self) -> Option<String> {
        self.filename.clone()
    }
}

/// A file on the local filesystem
///
/// The file is never modified. Pipelines that start in file mode copy it.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn read(&self) -> AttachmentResult<Bytes> {
        fs::read(&self.path).await.map(Bytes::from).map_err(|e| {
            AttachmentError::Source(format!("cannot read {}: {}", self.path.display(), e))
        })
    }

    fn path(&self) -> Option<String> {
        self.path.to_str().map(str::to_string)
    }

    fn local_file(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn copy_to(&self, dest: &Path) -> AttachmentResult<()> {
        fs::copy(&self.path, dest).await.map_err(|e| {
            AttachmentError::Source(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

/// Contents fetched over HTTP
#[derive(Debug, Clone)]
pub struct UrlSource {
    url: Url,
    client: reqwest::Client,
}

impl UrlSource {
    pub const MAX_REDIRECTS: usize = 10;
    pub const MAX_ATTEMPTS: usize = 3;

    pub fn new(url: &str) -> AttachmentResult<Self> {
        let url = Url::parse(url)
            .map_err(|_| AttachmentError::Source(format!("'{}' is not a valid URI", url)))?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(Self::MAX_REDIRECTS))
            .build()
            .map_err(|e| AttachmentError::Source(e.to_string()))?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Option<Bytes> {
        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "Unexpected response");
            return None;
        }

        response.bytes().await.ok()
    }
}

#[async_trait]
impl Source for UrlSource {
    async fn read(&self) -> AttachmentResult<Bytes> {
        for attempt in 1..=Self::MAX_ATTEMPTS {
            if let Some(body) = self.fetch().await {
                return Ok(body);
            }
            debug!(url = %self.url, attempt = attempt, "Retrying download");
        }

        Err(AttachmentError::Source(format!(
            "Connection to {} failed after {} attempts",
            self.url,
            Self::MAX_ATTEMPTS
        )))
    }

    fn original_filename(&self) -> Option<String> {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)
    }

    fn path(&self) -> Option<String> {
        Some(self.url.path().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hinted {
        filename: Option<String>,
        original: Option<String>,
        path: Option<String>,
    }

    #[async_trait]
    impl Source for Hinted {
        async fn read(&self) -> AttachmentResult<Bytes> {
            Ok(Bytes::new())
        }

        fn filename(&self) -> Option<String> {
            self.filename.clone()
        }

        fn original_filename(&self) -> Option<String> {
            self.original.clone()
        }

        fn path(&self) -> Option<String> {
            self.path.clone()
        }
    }

    fn hinted(filename: Option<&str>, original: Option<&str>, path: Option<&str>) -> SourceHandle {
        SourceHandle::new(Hinted {
            filename: filename.map(str::to_string),
            original: original.map(str::to_string),
            path: path.map(str::to_string),
        })
    }

    #[test]
    fn test_filename_detection_order() {
        assert_eq!(
            hinted(Some("a.txt"), Some("b.txt"), Some("/x/c.txt")).detected_filename(),
            Some("a.txt".to_string())
        );
        assert_eq!(
            hinted(None, Some("b.txt"), Some("/x/c.txt")).detected_filename(),
            Some("b.txt".to_string())
        );
        assert_eq!(
            hinted(Some(""), None, Some("/x/c.txt")).detected_filename(),
            Some("c.txt".to_string())
        );
        assert_eq!(hinted(None, Some(""), Some("")).detected_filename(), None);
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let a = SourceHandle::new(StringSource::new("same"));
        let b = SourceHandle::new(StringSource::new("same"));

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_string_source() {
        let source = SourceHandle::new(StringSource::with_filename("hello", "a.txt"));

        assert_eq!(source.read().await.unwrap(), "hello");
        assert_eq!(source.detected_filename(), Some("a.txt".to_string()));
        assert!(source.local_file().is_none());
    }

    #[tokio::test]
    async fn test_file_source_copies_without_touching_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("photo.jpg");
        let copy = dir.path().join("copy.jpg");
        std::fs::write(&original, b"jpeg bytes").unwrap();

        let source = SourceHandle::new(FileSource::new(&original));
        assert_eq!(source.detected_filename(), Some("photo.jpg".to_string()));

        source.copy_to(&copy).await.unwrap();
        std::fs::write(&copy, b"changed").unwrap();

        assert_eq!(source.read().await.unwrap(), "jpeg bytes");
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("/definitely/not/here.txt");
        assert!(matches!(source.read().await, Err(AttachmentError::Source(_))));
    }

    #[test]
    fn test_url_source_hints() {
        let source = UrlSource::new("http://example.com/images/logo.png?size=2").unwrap();
        assert_eq!(source.original_filename(), Some("logo.png".to_string()));
        assert_eq!(source.path(), Some("/images/logo.png".to_string()));
    }

    #[test]
    fn test_url_source_invalid() {
        assert!(matches!(
            UrlSource::new("not a url"),
            Err(AttachmentError::Source(_))
        ));
    }
}
