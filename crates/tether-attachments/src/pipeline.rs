//! Processor pipeline
//!
//! Runs an ordered list of steps over `(content, filename)`. Each step
//! declares whether it works on an in-memory buffer or on a local temp
//! file, and the pipeline converts between the two only when the next step
//! needs the other representation. Temp files are owned by `Content` and
//! removed when it is dropped, whatever the outcome of the run.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tether_storage::Storage;
use tokio::fs;
use tracing::debug;

use crate::context::ProcessContext;
use crate::error::AttachmentResult;

/// Representation a step works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Memory,
    File,
}

/// Result of one step
#[derive(Debug)]
pub enum Flow<T> {
    /// Keep going with the returned content and filename
    Continue(T, String),
    /// Abandon the whole write without an error
    Halt,
}

/// Step working on an in-memory buffer
#[async_trait]
pub trait MemoryProcessor: Send + Sync {
    async fn process(
        &self,
        contents: Bytes,
        filename: String,
        ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<Bytes>>;
}

/// Step working on a local temp file
///
/// The step owns the file it receives. Returning a different file makes it
/// the current one; the received file is deleted when dropped.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(
        &self,
        file: NamedTempFile,
        filename: String,
        ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<NamedTempFile>>;
}

/// Memory step built from a closure
pub struct MemoryFn<F>(pub F);

#[async_trait]
impl<F> MemoryProcessor for MemoryFn<F>
where
    F: Fn(Bytes, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<Bytes>> + Send + Sync,
{
    async fn process(
        &self,
        contents: Bytes,
        filename: String,
        ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<Bytes>> {
        (self.0)(contents, filename, ctx)
    }
}

/// File step built from a closure
pub struct FileFn<F>(pub F);

#[async_trait]
impl<F> FileProcessor for FileFn<F>
where
    F: Fn(NamedTempFile, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<NamedTempFile>>
        + Send
        + Sync,
{
    async fn process(
        &self,
        file: NamedTempFile,
        filename: String,
        ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<Flow<NamedTempFile>> {
        (self.0)(file, filename, ctx)
    }
}

/// A declared step
#[derive(Clone)]
pub enum Step {
    Memory(Arc<dyn MemoryProcessor>),
    File(Arc<dyn FileProcessor>),
}

impl Step {
    pub fn memory(processor: impl MemoryProcessor + 'static) -> Self {
        Self::Memory(Arc::new(processor))
    }

    pub fn file(processor: impl FileProcessor + 'static) -> Self {
        Self::File(Arc::new(processor))
    }

    pub fn memory_fn<F>(f: F) -> Self
    where
        F: Fn(Bytes, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<Bytes>>
            + Send
            + Sync
            + 'static,
    {
        Self::memory(MemoryFn(f))
    }

    pub fn file_fn<F>(f: F) -> Self
    where
        F: Fn(NamedTempFile, String, &mut ProcessContext<'_>) -> AttachmentResult<Flow<NamedTempFile>>
            + Send
            + Sync
            + 'static,
    {
        Self::file(FileFn(f))
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Memory(_) => Mode::Memory,
            Self::File(_) => Mode::File,
        }
    }
}

/// A step and the version it is scoped to (`None` runs for every version)
#[derive(Clone)]
pub struct ProcessorStep {
    pub step: Step,
    pub version: Option<String>,
}

impl ProcessorStep {
    /// Whether the step runs when processing `version`
    pub fn applies_to(&self, version: Option<&str>) -> bool {
        match &self.version {
            None => true,
            Some(scope) => Some(scope.as_str()) == version,
        }
    }
}

/// Current representation of the content
#[derive(Debug)]
pub enum Content {
    Memory(Bytes),
    File(NamedTempFile),
}

impl Content {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Memory(_) => Mode::Memory,
            Self::File(_) => Mode::File,
        }
    }

    /// Load the contents into memory, deleting the temp file if any
    pub async fn into_bytes(self) -> AttachmentResult<Bytes> {
        match self {
            Self::Memory(bytes) => Ok(bytes),
            Self::File(file) => Ok(Bytes::from(fs::read(file.path()).await?)),
        }
    }

    /// Move the contents into a temp file named after `filename`
    pub async fn into_file(self, filename: &str) -> AttachmentResult<NamedTempFile> {
        match self {
            Self::File(file) => Ok(file),
            Self::Memory(bytes) => {
                let file = temp_file(filename)?;
                fs::write(file.path(), &bytes).await?;
                Ok(file)
            }
        }
    }

    /// Write the contents to storage, streaming temp files when supported
    pub async fn store(self, storage: &dyn Storage, path: &str) -> AttachmentResult<()> {
        match self {
            Self::Memory(bytes) => storage.write(path, bytes).await?,
            Self::File(file) if storage.supports_file_writes() => {
                storage.write_from_file(path, file.path()).await?
            }
            Self::File(file) => {
                let bytes = Bytes::from(fs::read(file.path()).await?);
                storage.write(path, bytes).await?
            }
        }
        Ok(())
    }
}

/// Fresh temp file keeping the extension of `filename`
pub fn temp_file(filename: &str) -> AttachmentResult<NamedTempFile> {
    let suffix = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    Ok(tempfile::Builder::new()
        .prefix("tether-")
        .suffix(&suffix)
        .tempfile()?)
}

/// Final content and filename of a completed run
#[derive(Debug)]
pub struct Output {
    pub content: Content,
    pub filename: String,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Done(Output),
    Halted,
}

/// Steps selected for one write
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Steps from `declared` that apply to `version`, in declaration order
    pub fn for_version(declared: &[ProcessorStep], version: Option<&str>) -> Self {
        Self::new(
            declared
                .iter()
                .filter(|s| s.applies_to(version))
                .map(|s| s.step.clone())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Mode of the first step
    pub fn preferred_mode(&self) -> Option<Mode> {
        self.steps.first().map(Step::mode)
    }

    pub async fn run(
        &self,
        input: Content,
        filename: String,
        ctx: &mut ProcessContext<'_>,
    ) -> AttachmentResult<PipelineOutcome> {
        let mut content = input;
        let mut filename = filename;

        for (index, step) in self.steps.iter().enumerate() {
            if content.mode() != step.mode() {
                debug!(step = index, from = ?content.mode(), to = ?step.mode(), "Switching mode");
            }

            let flow = match step {
                Step::Memory(processor) => {
                    let bytes = content.into_bytes().await?;
                    processor
                        .process(bytes, filename, ctx)
                        .await?
                        .map(Content::Memory)
                }
                Step::File(processor) => {
                    let file = content.into_file(&filename).await?;
                    processor
                        .process(file, filename, ctx)
                        .await?
                        .map(Content::File)
                }
            };

            match flow {
                Flow::Continue(next, next_filename) => {
                    content = next;
                    filename = next_filename;
                }
                Flow::Halt => {
                    debug!(step = index, "Pipeline halted");
                    return Ok(PipelineOutcome::Halted);
                }
            }
        }

        Ok(PipelineOutcome::Done(Output { content, filename }))
    }
}

impl<T> Flow<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Flow<U> {
        match self {
            Self::Continue(value, filename) => Flow::Continue(f(value), filename),
            Self::Halt => Flow::Halt,
        }
    }
}
