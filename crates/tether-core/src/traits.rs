//! Record identity traits
//!
//! Attachments never hold the owning record itself. They carry a
//! `RecordRef` snapshot taken when the attachment set is built.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key type
pub type Id = i64;

/// Lightweight reference to the record that owns an attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    /// Model name (e.g., "Post", "User")
    pub kind: String,
    /// Primary key, absent before the first insert
    pub id: Option<Id>,
}

impl RecordRef {
    pub fn new(kind: impl Into<String>, id: Option<Id>) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Reference to a record that has not been inserted yet
    pub fn unsaved(kind: impl Into<String>) -> Self {
        Self::new(kind, None)
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}#{}", self.kind, id),
            None => write!(f, "{}#new", self.kind),
        }
    }
}
