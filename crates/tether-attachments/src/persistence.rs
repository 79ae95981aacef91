//! Record persistence seam
//!
//! The owning record's storage (an ORM row, a document) is reached only
//! through `PersistenceLayer`: column reads when attachments are loaded and
//! one batched attribute write per life-cycle operation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether_core::{Id, RecordRef};

use crate::error::AttachmentResult;

/// Value written to a record column
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(Option<String>),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => value.as_deref(),
            _ => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(Some(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_string()))
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// One batched attribute write
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Access to the record that owns the attachments
#[async_trait]
pub trait PersistenceLayer: Send + Sync {
    /// Stored value of a path column
    async fn read(&self, column: &str) -> AttachmentResult<Option<String>>;

    /// Persist several columns at once
    async fn write_attrs(&self, attrs: Attributes) -> AttachmentResult<()>;

    fn is_persisted(&self) -> bool;

    fn record(&self) -> RecordRef;

    /// Columns touched when an update changes attachment paths
    fn timestamp_columns(&self) -> Vec<String> {
        vec!["updated_at".to_string()]
    }
}

/// In-memory record
#[derive(Debug)]
pub struct MemoryRecord {
    kind: String,
    id: Mutex<Option<Id>>,
    columns: Mutex<Attributes>,
    writes: Mutex<Vec<Attributes>>,
}

impl MemoryRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Mutex::new(None),
            columns: Mutex::new(Attributes::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn persisted(kind: impl Into<String>, id: Id) -> Self {
        let record = Self::new(kind);
        *record.id.lock() = Some(id);
        record
    }

    /// Seed a stored column value
    pub fn with_column(self, column: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.columns.lock().insert(column.into(), value.into());
        self
    }

    /// Mark as inserted
    pub fn set_id(&self, id: Id) {
        *self.id.lock() = Some(id);
    }

    pub fn column(&self, column: &str) -> Option<AttributeValue> {
        self.columns.lock().get(column).cloned()
    }

    /// Every batch written so far
    pub fn writes(&self) -> Vec<Attributes> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

#[async_trait]
impl PersistenceLayer for MemoryRecord {
    async fn read(&self, column: &str) -> AttachmentResult<Option<String>> {
        Ok(self
            .columns
            .lock()
            .get(column)
            .and_then(|value| value.as_text().map(str::to_string)))
    }

    async fn write_attrs(&self, attrs: Attributes) -> AttachmentResult<()> {
        self.columns.lock().extend(attrs.clone());
        self.writes.lock().push(attrs);
        Ok(())
    }

    fn is_persisted(&self) -> bool {
        self.id.lock().is_some()
    }

    fn record(&self) -> RecordRef {
        RecordRef::new(self.kind.clone(), *self.id.lock())
    }
}
