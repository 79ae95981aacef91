//! Store directory resolution

use std::sync::Arc;

use crate::context::UploadContext;
use crate::error::{AttachmentError, AttachmentResult};

pub type StoreDirResolver = Arc<dyn Fn(&UploadContext) -> AttachmentResult<String> + Send + Sync>;

/// A declared store directory, optionally scoped to one version
#[derive(Clone)]
pub struct StoreDirRule {
    pub resolver: StoreDirResolver,
    pub version: Option<String>,
}

/// Declared store directory rules in declaration order
#[derive(Clone, Default)]
pub struct StoreDirs {
    rules: Vec<StoreDirRule>,
}

impl StoreDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: StoreDirRule) {
        self.rules.push(rule);
    }

    /// Append rules declared elsewhere, keeping their order
    pub fn extend(&mut self, other: StoreDirs) {
        self.rules.extend(other.rules);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Directory for the version in `ctx`
    ///
    /// The last rule declared for that version wins, then the last
    /// unscoped rule. Resolvers only run here, at write time, so they may
    /// depend on record state such as a freshly assigned id.
    pub fn resolve(&self, ctx: &UploadContext) -> AttachmentResult<String> {
        let version = ctx.version.as_deref();

        let scoped = version.and_then(|v| {
            self.rules
                .iter()
                .rev()
                .find(|rule| rule.version.as_deref() == Some(v))
        });

        let rule = scoped
            .or_else(|| self.rules.iter().rev().find(|rule| rule.version.is_none()))
            .ok_or_else(|| {
                AttachmentError::Configuration(
                    "Please use store_dir before trying to write".to_string(),
                )
            })?;

        (rule.resolver)(ctx)
    }
}
