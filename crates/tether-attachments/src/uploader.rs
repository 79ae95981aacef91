//! Uploader definitions
//!
//! An uploader is the immutable description of how one attachment is
//! processed and where it is stored. It is declared once with
//! `Uploader::builder()` and shared between every record that uses it.
//!
//! ```rust,ignore
//! let uploader = Uploader::builder()
//!     .store_dir_static("/uploads")
//!     .process(DigestFilename::new())
//!     .version("thumb", |v| v.store_dir_static("/thumbs").process_with_file(Resize::new(64)))
//!     .after_upload(|stash, _ctx, attrs| {
//!         if let Some(size) = stash.get("size") {
//!             attrs.insert("file_size".into(), size.clone().into());
//!         }
//!         Ok(())
//!     })
//!     .build()?;
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::NamedTempFile;
use tether_storage::{join_path, Storage};

use crate::context::{ProcessContext, Stash, UploadContext};
use crate::error::{AttachmentError, AttachmentResult};
use crate::persistence::Attributes;
use crate::pipeline::{
    temp_file, Content, FileProcessor, Flow, MemoryProcessor, Mode, Pipeline, PipelineOutcome,
    ProcessorStep, Step,
};
use crate::settings::Settings;
use crate::source::SourceHandle;
use crate::store_dir::{StoreDirRule, StoreDirs};

/// Hook run after a successful upload with the stash built by processors
pub type AfterUpload =
    Arc<dyn Fn(&Stash, &UploadContext, &mut Attributes) -> AttachmentResult<()> + Send + Sync>;

pub struct Uploader {
    store_dirs: StoreDirs,
    steps: Vec<ProcessorStep>,
    after_upload: Vec<AfterUpload>,
    versions: Vec<String>,
}

impl Uploader {
    pub fn builder() -> UploaderBuilder {
        UploaderBuilder::default()
    }

    /// Declared versions in declaration order
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn has_version(&self, name: &str) -> bool {
        self.versions.iter().any(|v| v == name)
    }

    pub fn after_upload_hooks(&self) -> &[AfterUpload] {
        &self.after_upload
    }

    pub fn store_dir(&self, ctx: &UploadContext) -> AttachmentResult<String> {
        self.store_dirs.resolve(ctx)
    }

    pub fn pipeline(&self, version: Option<&str>) -> Pipeline {
        Pipeline::for_version(&self.steps, version)
    }

    /// Run the pipeline for one write
    ///
    /// Returns `None` when a step halted. Nothing is written to storage
    /// here; the caller stores the returned content.
    pub async fn process(
        &self,
        settings: &Settings,
        ctx: &UploadContext,
        stash: &mut Stash,
        source: &SourceHandle,
        filename: String,
    ) -> AttachmentResult<Option<Processed>> {
        let dir = self.store_dir(ctx)?;
        let pipeline = if settings.processing_enabled {
            self.pipeline(ctx.version.as_deref())
        } else {
            Pipeline::default()
        };

        let start_with_file = source.local_file().is_some()
            && match pipeline.preferred_mode() {
                Some(mode) => mode == Mode::File,
                None => settings.storage().supports_file_writes(),
            };

        let input = if start_with_file {
            let file = temp_file(&filename)?;
            source.copy_to(file.path()).await?;
            Content::File(file)
        } else {
            Content::Memory(source.read().await?)
        };

        let mut process_ctx = ProcessContext::new(ctx, stash);
        match pipeline.run(input, filename, &mut process_ctx).await? {
            PipelineOutcome::Halted => Ok(None),
            PipelineOutcome::Done(output) => Ok(Some(Processed {
                path: join_path(&dir, &output.filename),
                content: output.content,
            })),
        }
    }
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("steps", &self.steps.len())
            .field("after_upload", &self.after_upload.len())
            .field("versions", &self.versions)
            .finish()
    }
}

/// Processed content waiting to be stored
#[derive(Debug)]
pub struct Processed {
    path: String,
    content: Content,
}

impl Processed {
    /// Destination path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Write to storage and return the path
    pub async fn store(self, storage: &dyn Storage) -> AttachmentResult<String> {
        self.content.store(storage, &self.path).await?;
        Ok(self.path)
    }
}

#[derive(Default)]
struct Rules {
    store_dirs: StoreDirs,
    steps: Vec<ProcessorStep>,
}

impl Rules {
    fn store_dir<F>(&mut self, resolver: F, version: Option<&str>)
    where
        F: Fn(&UploadContext) -> AttachmentResult<String> + Send + Sync + 'static,
    {
        self.store_dirs.push(StoreDirRule {
            resolver: Arc::new(resolver),
            version: version.map(str::to_string),
        });
    }

    fn step(&mut self, step: Step, version: Option<&str>) {
        self.steps.push(ProcessorStep {
            step,
            version: version.map(str::to_string),
        });
    }
}

#[derive(Default)]
pub struct UploaderBuilder {
    rules: Rules,
    after_upload: Vec<AfterUpload>,
    versions: Vec<String>,
    duplicates: Vec<String>,
}

impl UploaderBuilder {
    pub fn store_dir<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&UploadContext) -> AttachmentResult<String> + Send + Sync + 'static,
    {
        self.rules.store_dir(resolver, None);
        self
    }

    pub fn store_dir_static(self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        self.store_dir(move |_| Ok(dir.clone()))
    }

    pub fn process(mut self, processor: impl MemoryProcessor + 'static) -> Self {
        self.rules.step(Step::memory(processor), None);
        self
    }

    pub fn process_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Bytes, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<Bytes>>
            + Send
            + Sync
            + 'static,
    {
        self.rules.step(Step::memory_fn(f), None);
        self
    }

    pub fn process_with_file(mut self, processor: impl FileProcessor + 'static) -> Self {
        self.rules.step(Step::file(processor), None);
        self
    }

    pub fn process_with_file_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(NamedTempFile, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<NamedTempFile>>
            + Send
            + Sync
            + 'static,
    {
        self.rules.step(Step::file_fn(f), None);
        self
    }

    pub fn after_upload<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Stash, &UploadContext, &mut Attributes) -> AttachmentResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.after_upload.push(Arc::new(hook));
        self
    }

    /// Declare a version
    ///
    /// Everything registered on the version builder is scoped to `name`.
    /// Its steps run after the unscoped steps declared before this call.
    pub fn version<F>(mut self, name: impl Into<String>, declare: F) -> Self
    where
        F: FnOnce(VersionBuilder) -> VersionBuilder,
    {
        let name = name.into();
        if self.versions.contains(&name) {
            self.duplicates.push(name.clone());
        } else {
            self.versions.push(name.clone());
        }

        let version = declare(VersionBuilder {
            name,
            rules: Rules::default(),
        });

        self.rules.store_dirs.extend(version.rules.store_dirs);
        self.rules.steps.extend(version.rules.steps);
        self
    }

    pub fn build(self) -> AttachmentResult<Uploader> {
        if let Some(name) = self.duplicates.first() {
            return Err(AttachmentError::Configuration(format!(
                "version '{}' is declared more than once",
                name
            )));
        }

        Ok(Uploader {
            store_dirs: self.rules.store_dirs,
            steps: self.rules.steps,
            after_upload: self.after_upload,
            versions: self.versions,
        })
    }
}

/// Registrations scoped to one version
pub struct VersionBuilder {
    name: String,
    rules: Rules,
}

impl VersionBuilder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_dir<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&UploadContext) -> AttachmentResult<String> + Send + Sync + 'static,
    {
        self.rules.store_dir(resolver, Some(self.name.as_str()));
        self
    }

    pub fn store_dir_static(self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        self.store_dir(move |_| Ok(dir.clone()))
    }

    pub fn process(mut self, processor: impl MemoryProcessor + 'static) -> Self {
        self.rules.step(Step::memory(processor), Some(self.name.as_str()));
        self
    }

    pub fn process_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Bytes, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<Bytes>>
            + Send
            + Sync
            + 'static,
    {
        self.rules.step(Step::memory_fn(f), Some(self.name.as_str()));
        self
    }

    pub fn process_with_file(mut self, processor: impl FileProcessor + 'static) -> Self {
        self.rules.step(Step::file(processor), Some(self.name.as_str()));
        self
    }

    pub fn process_with_file_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(NamedTempFile, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<NamedTempFile>>
            + Send
            + Sync
            + 'static,
    {
        self.rules.step(Step::file_fn(f), Some(self.name.as_str()));
        self
    }
}
