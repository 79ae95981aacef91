//! Content digest in the filename

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::context::ProcessContext;
use crate::error::AttachmentResult;
use crate::pipeline::{FileProcessor, Flow, MemoryProcessor};

const CHUNK_SIZE: usize = 64 * 1024;

/// Appends the MD5 hex digest of the contents to the filename stem
///
/// `photo.jpg` becomes `photo-<hex>.jpg`. In file mode the digest is
/// computed in chunks without loading the file.
#[derive(Debug, Clone)]
pub struct DigestFilename {
    separator: String,
}

impl DigestFilename {
    pub fn new() -> Self {
        Self {
            separator: "-".to_string(),
        }
    }

    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    fn rename(&self, filename: &str, digest: &str) -> String {
        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}{}{}.{}", stem, self.separator, digest, ext),
            None => format!("{}{}{}", stem, self.separator, digest),
        }
    }
}

impl Default for DigestFilename {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryProcessor for DigestFilename {
    async fn process(
        &self,
        contents: Bytes,
        filename: String,
        _ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<Bytes>> {
        let digest = format!("{:x}", md5::compute(&contents));
        let filename = self.rename(&filename, &digest);
        Ok(Flow::Continue(contents, filename))
    }
}

#[async_trait]
impl FileProcessor for DigestFilename {
    async fn process(
        &self,
        file: NamedTempFile,
        filename: String,
        _ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<NamedTempFile>> {
        let mut handle = File::open(file.path()).await?;
        let mut hasher = md5::Context::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let read = handle.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.consume(&buf[..read]);
        }

        let digest = format!("{:x}", hasher.compute());
        let filename = self.rename(&filename, &digest);
        Ok(Flow::Continue(file, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Stash, UploadContext};
    use crate::pipeline::temp_file;
    use tether_core::RecordRef;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[tokio::test]
    async fn test_memory_digest() {
        let upload = UploadContext::new(RecordRef::unsaved("Post"), "file", None);
        let mut stash = Stash::new();
        let mut ctx = ProcessContext::new(&upload, &mut stash);

        let flow = MemoryProcessor::process(
            &DigestFilename::new(),
            Bytes::from("hello"),
            "a.txt".into(),
            &mut ctx,
        )
        .await
        .unwrap();

        let Flow::Continue(contents, filename) = flow else {
            panic!("expected continue");
        };
        assert_eq!(contents, "hello");
        assert_eq!(filename, format!("a-{}.txt", HELLO_MD5));
    }

    #[tokio::test]
    async fn test_file_digest_matches_memory_digest() {
        let upload = UploadContext::new(RecordRef::unsaved("Post"), "file", None);
        let mut stash = Stash::new();
        let mut ctx = ProcessContext::new(&upload, &mut stash);

        let file = temp_file("a").unwrap();
        std::fs::write(file.path(), b"hello").unwrap();

        let flow = FileProcessor::process(
            &DigestFilename::with_separator("_"),
            file,
            "readme".into(),
            &mut ctx,
        )
        .await
        .unwrap();

        let Flow::Continue(_, filename) = flow else {
            panic!("expected continue");
        };
        assert_eq!(filename, format!("readme_{}", HELLO_MD5));
    }
}
