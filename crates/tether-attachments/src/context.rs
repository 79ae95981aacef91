//! Upload context passed to processors, store-dir resolvers and hooks

use std::collections::BTreeMap;

use tether_core::RecordRef;

/// Key/value data accumulated by processors during one write
pub type Stash = BTreeMap<String, serde_json::Value>;

/// Which record, attachment and version is being processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadContext {
    pub record: RecordRef,
    pub attached_as: String,
    pub version: Option<String>,
}

impl UploadContext {
    pub fn new(record: RecordRef, attached_as: impl Into<String>, version: Option<String>) -> Self {
        Self {
            record,
            attached_as: attached_as.into(),
            version,
        }
    }

    /// Column holding this attachment's path
    pub fn column(&self) -> String {
        column_name(&self.attached_as, self.version.as_deref())
    }
}

/// Column name for an attachment and optional version
pub fn column_name(attached_as: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{}_{}", attached_as, version),
        None => attached_as.to_string(),
    }
}

/// Mutable view handed to each processor step
pub struct ProcessContext<'a> {
    upload: &'a UploadContext,
    stash: &'a mut Stash,
}

impl<'a> ProcessContext<'a> {
    pub fn new(upload: &'a UploadContext, stash: &'a mut Stash) -> Self {
        Self { upload, stash }
    }

    pub fn upload(&self) -> &UploadContext {
        self.upload
    }

    pub fn record(&self) -> &RecordRef {
        &self.upload.record
    }

    pub fn attached_as(&self) -> &str {
        &self.upload.attached_as
    }

    pub fn version(&self) -> Option<&str> {
        self.upload.version.as_deref()
    }

    /// Store derived data for the uploader's after-upload hooks
    pub fn stash(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.stash.insert(key.into(), value.into());
    }

    pub fn stashed(&self) -> &Stash {
        self.stash
    }
}
