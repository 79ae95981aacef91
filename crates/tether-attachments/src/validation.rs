//! Validations of assigned content

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::ValidationErrors;

use crate::attached::AttachedFiles;
use crate::attachment::Attachment;
use crate::error::{AttachmentError, AttachmentResult};
use crate::pipeline::temp_file;

/// What is being validated
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub attached_as: String,
    pub column: String,
}

/// Check on the contents held in memory
#[async_trait]
pub trait MemoryValidation: Send + Sync {
    /// Error messages, empty when valid
    async fn validate(
        &self,
        contents: &Bytes,
        filename: &str,
        ctx: &ValidationContext,
    ) -> AttachmentResult<Vec<String>>;
}

/// Check on a local copy of the contents
#[async_trait]
pub trait FileValidation: Send + Sync {
    async fn validate(
        &self,
        file: &Path,
        filename: &str,
        ctx: &ValidationContext,
    ) -> AttachmentResult<Vec<String>>;
}

struct MemoryValidationFn<F>(F);

#[async_trait]
impl<F> MemoryValidation for MemoryValidationFn<F>
where
    F: Fn(&Bytes, &str, &ValidationContext) -> Vec<String> + Send + Sync,
{
    async fn validate(
        &self,
        contents: &Bytes,
        filename: &str,
        ctx: &ValidationContext,
    ) -> AttachmentResult<Vec<String>> {
        Ok((self.0)(contents, filename, ctx))
    }
}

struct FileValidationFn<F>(F);

#[async_trait]
impl<F> FileValidation for FileValidationFn<F>
where
    F: Fn(&Path, &str, &ValidationContext) -> Vec<String> + Send + Sync,
{
    async fn validate(
        &self,
        file: &Path,
        filename: &str,
        ctx: &ValidationContext,
    ) -> AttachmentResult<Vec<String>> {
        Ok((self.0)(file, filename, ctx))
    }
}

#[derive(Clone)]
enum Rule {
    Memory(Arc<dyn MemoryValidation>),
    File(Arc<dyn FileValidation>),
}

/// Validations declared per attachment name
#[derive(Clone, Default)]
pub struct Validator {
    rules: Vec<(String, Rule)>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, attached_as: &str, validation: impl MemoryValidation + 'static) -> Self {
        self.rules
            .push((attached_as.to_string(), Rule::Memory(Arc::new(validation))));
        self
    }

    pub fn validate_fn<F>(self, attached_as: &str, f: F) -> Self
    where
        F: Fn(&Bytes, &str, &ValidationContext) -> Vec<String> + Send + Sync + 'static,
    {
        self.validate(attached_as, MemoryValidationFn(f))
    }

    pub fn validate_with_file(
        mut self,
        attached_as: &str,
        validation: impl FileValidation + 'static,
    ) -> Self {
        self.rules
            .push((attached_as.to_string(), Rule::File(Arc::new(validation))));
        self
    }

    pub fn validate_with_file_fn<F>(self, attached_as: &str, f: F) -> Self
    where
        F: Fn(&Path, &str, &ValidationContext) -> Vec<String> + Send + Sync + 'static,
    {
        self.validate_with_file(attached_as, FileValidationFn(f))
    }

    /// Run the declared validations against changed attachments
    ///
    /// Unchanged attachments are skipped. Errors are keyed by column.
    pub async fn run(&self, files: &AttachedFiles) -> AttachmentResult<ValidationErrors> {
        let mut errors = ValidationErrors::new();

        for (attached_as, rule) in &self.rules {
            let attachment = files.get(attached_as).ok_or_else(|| {
                AttachmentError::Configuration(format!(
                    "validation declared for unknown attachment '{}'",
                    attached_as
                ))
            })?;

            let Some(filename) = attachment.filename_to_be_assigned() else {
                continue;
            };
            let ctx = ValidationContext {
                attached_as: attached_as.clone(),
                column: attachment.column(),
            };

            for message in check(attachment, rule, &filename, &ctx).await? {
                errors.add(ctx.column.clone(), message);
            }
        }

        Ok(errors)
    }
}

async fn check(
    attachment: &Attachment,
    rule: &Rule,
    filename: &str,
    ctx: &ValidationContext,
) -> AttachmentResult<Vec<String>> {
    let Some(source) = attachment.source() else {
        return Ok(Vec::new());
    };

    match rule {
        Rule::Memory(validation) => {
            let contents = source.read().await?;
            validation.validate(&contents, filename, ctx).await
        }
        Rule::File(validation) => {
            let file = temp_file(filename)?;
            source.copy_to(file.path()).await?;
            validation.validate(file.path(), filename, ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attached::AttachmentDefinition;
    use crate::settings::Settings;
    use crate::source::{SourceHandle, StringSource};
    use crate::uploader::Uploader;
    use tether_core::RecordRef;
    use tether_storage::MemoryStorage;

    fn files() -> AttachedFiles {
        let uploader = Arc::new(Uploader::builder().store_dir_static("/d").build().unwrap());
        AttachedFiles::new(
            vec![
                AttachmentDefinition::new("file", uploader.clone()),
                AttachmentDefinition::new("avatar", uploader),
            ],
            Settings::new(Arc::new(MemoryStorage::new())),
            RecordRef::unsaved("User"),
        )
        .unwrap()
    }

    fn max_size(limit: usize) -> impl Fn(&Bytes, &str, &ValidationContext) -> Vec<String> + Send + Sync + 'static {
        move |contents, _filename, _ctx| {
            if contents.len() > limit {
                vec![format!("must be at most {} bytes", limit)]
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test]
    async fn test_memory_validation() {
        let mut files = files();
        files
            .assign("file", SourceHandle::new(StringSource::with_filename("too long", "a.txt")))
            .unwrap();

        let errors = Validator::new()
            .validate_fn("file", max_size(3))
            .validate_fn("avatar", max_size(3))
            .run(&files)
            .await
            .unwrap();

        assert_eq!(
            errors.get("file"),
            Some(&vec!["must be at most 3 bytes".to_string()])
        );
        assert!(!errors.has_error("avatar"));
    }

    #[tokio::test]
    async fn test_file_validation_sees_extension() {
        let mut files = files();
        files
            .assign("avatar", SourceHandle::new(StringSource::with_filename("GIF89a", "me.exe")))
            .unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let recorder = seen.clone();
        let errors = Validator::new()
            .validate_with_file_fn("avatar", move |path, filename, _ctx| {
                *recorder.lock() = Some(path.to_path_buf());
                let contents = std::fs::read(path).unwrap_or_default();
                let mut messages = Vec::new();
                if !filename.ends_with(".gif") {
                    messages.push("must be a gif".to_string());
                }
                if !contents.starts_with(b"GIF") {
                    messages.push("is not an image".to_string());
                }
                messages
            })
            .run(&files)
            .await
            .unwrap();

        assert_eq!(errors.get("avatar"), Some(&vec!["must be a gif".to_string()]));
        let temp = seen.lock().clone().unwrap();
        assert!(temp.to_string_lossy().ends_with(".exe"));
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_unchanged_attachments_are_skipped() {
        let mut files = files();
        files
            .assign("file", SourceHandle::new(StringSource::with_filename("ok", "a.txt")))
            .unwrap();

        let errors = Validator::new()
            .validate_fn("file", max_size(3))
            .validate_fn("avatar", |_contents, _filename, _ctx| vec!["never runs".to_string()])
            .run(&files)
            .await
            .unwrap();

        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_attachment() {
        let result = Validator::new()
            .validate_fn("missing", max_size(1))
            .run(&files())
            .await;

        assert!(matches!(result, Err(AttachmentError::Configuration(_))));
    }
}
