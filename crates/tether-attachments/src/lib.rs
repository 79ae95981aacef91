//! # tether-attachments
//!
//! File attachments for records, with processing pipelines and storage
//! writes tied to the record's transaction.
//!
//! ## Features
//!
//! - Sources: in-memory bytes, local files, URLs
//! - Processor pipelines switching between memory and temp-file steps
//! - Versions with their own store directories and steps
//! - Compensating commit/rollback hooks around every storage mutation
//! - Bounded concurrent uploads
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_attachments::*;
//! use tether_storage::MemoryStorage;
//!
//! let uploader = Uploader::builder()
//!     .store_dir(|ctx| Ok(format!("/posts/{}", ctx.record.id.unwrap_or_default())))
//!     .process(DigestFilename::new())
//!     .build()?;
//!
//! let settings = Settings::new(Arc::new(MemoryStorage::new()));
//! let record = MemoryRecord::persisted("Post", 7);
//! let mut files = AttachedFiles::load(
//!     vec![AttachmentDefinition::new("file", uploader)],
//!     settings,
//!     &record,
//! )
//! .await?;
//!
//! files.assign("file", SourceHandle::new(StringSource::with_filename("hello", "a.txt")))?;
//!
//! let tx = Arc::new(Transaction::new());
//! LifeCycle::new(&mut files, &record, tx.clone()).update().await?;
//! tx.commit().await?;
//! ```

pub mod attached;
pub mod attachment;
pub mod context;
pub mod error;
pub mod life_cycle;
pub mod persistence;
pub mod pipeline;
pub mod processors;
pub mod settings;
pub mod source;
pub mod store_dir;
pub mod throttle;
pub mod transaction;
pub mod uploader;
pub mod validation;

pub use attached::{AttachedFiles, AttachmentDefinition};
pub use attachment::{Attachment, AttachmentState, PersistedFile};
pub use context::{column_name, ProcessContext, Stash, UploadContext};
pub use error::{AttachmentError, AttachmentResult};
pub use life_cycle::{LifeCycle, Operation};
pub use persistence::{AttributeValue, Attributes, MemoryRecord, PersistenceLayer};
pub use pipeline::{
    Content, FileFn, FileProcessor, Flow, MemoryFn, MemoryProcessor, Mode, Pipeline,
    PipelineOutcome, ProcessorStep, Step,
};
pub use processors::DigestFilename;
pub use settings::{Settings, StorageProvider};
pub use source::{FileSource, Source, SourceHandle, StringSource, UrlSource};
pub use store_dir::{StoreDirRule, StoreDirs};
pub use throttle::Throttle;
pub use transaction::{hook, HookAction, Immediate, Transaction, TransactionHooks, Trigger};
pub use uploader::{AfterUpload, Processed, Uploader, UploaderBuilder, VersionBuilder};
pub use validation::{FileValidation, MemoryValidation, ValidationContext, Validator};
