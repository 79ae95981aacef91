//! Life-cycle orchestration
//!
//! Ties storage writes and deletes of a record's attachments to the
//! record's own transaction. Changed attachments are uploaded on a bounded
//! set of tasks, compensating actions are registered with the transaction
//! hooks, and all resulting columns are persisted in a single batch.

use std::sync::Arc;

use chrono::Utc;
use tether_storage::{dirname, join_path, Storage};
use tracing::{debug, info, instrument, warn};

use crate::attached::AttachedFiles;
use crate::attachment::Attachment;
use crate::error::{AttachmentError, AttachmentResult};
use crate::persistence::{AttributeValue, Attributes, PersistenceLayer};
use crate::throttle::Throttle;
use crate::transaction::{hook, HookAction, TransactionHooks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Outcome of one dispatched upload
struct Uploaded {
    slot: usize,
    path: Option<String>,
}

pub struct LifeCycle<'a> {
    files: &'a mut AttachedFiles,
    layer: &'a dyn PersistenceLayer,
    hooks: Arc<dyn TransactionHooks>,
}

impl<'a> LifeCycle<'a> {
    pub fn new(
        files: &'a mut AttachedFiles,
        layer: &'a dyn PersistenceLayer,
        hooks: Arc<dyn TransactionHooks>,
    ) -> Self {
        Self {
            files,
            layer,
            hooks,
        }
    }

    pub async fn run(&mut self, operation: Operation) -> AttachmentResult<()> {
        match operation {
            Operation::Create => self.create().await,
            Operation::Update => self.update().await,
            Operation::Delete => self.delete().await,
        }
    }

    /// Create when the attachments were built before the record's insert,
    /// update otherwise
    ///
    /// Runs after the record itself was saved, so the layer already reports
    /// an id for a fresh insert. The attachment set still holds the
    /// reference it was built with and tells the two cases apart.
    pub async fn save(&mut self) -> AttachmentResult<()> {
        if self.files.record().id.is_none() {
            self.create().await
        } else {
            self.update().await
        }
    }

    /// Upload every changed attachment of a freshly inserted record
    #[instrument(skip(self), fields(record = %self.files.record()))]
    pub async fn create(&mut self) -> AttachmentResult<()> {
        self.files.set_record(self.layer.record());

        let uploaded = self.dispatch(Operation::Create).await?;
        let mut attrs = self.path_attributes(&uploaded);
        self.after_upload(&uploaded, &mut attrs)?;

        self.persist(attrs).await
    }

    /// Upload every changed attachment of an existing record
    #[instrument(skip(self), fields(record = %self.files.record()))]
    pub async fn update(&mut self) -> AttachmentResult<()> {
        self.files.set_record(self.layer.record());

        let uploaded = self.dispatch(Operation::Update).await?;
        let mut attrs = self.path_attributes(&uploaded);

        if !attrs.is_empty() {
            let now = Utc::now();
            for column in self.layer.timestamp_columns() {
                attrs.insert(column, AttributeValue::Timestamp(now));
            }
        }
        self.after_upload(&uploaded, &mut attrs)?;

        self.persist(attrs).await
    }

    /// Clear every attachment and delete its object once the record's
    /// deletion commits
    #[instrument(skip(self), fields(record = %self.files.record()))]
    pub async fn delete(&mut self) -> AttachmentResult<()> {
        for slot in self.files.slots_mut() {
            if let Some(path) = slot.persisted_path() {
                let storage = slot.settings().storage();
                self.hooks
                    .run_after_commit(delete_hook(storage, path.to_string()))
                    .await?;
            }
            slot.delete();
        }
        Ok(())
    }

    async fn persist(&self, attrs: Attributes) -> AttachmentResult<()> {
        if attrs.is_empty() {
            debug!("No attachment columns to persist");
            return Ok(());
        }

        info!(columns = attrs.len(), "Persisting attachment columns");
        self.layer.write_attrs(attrs).await
    }

    fn path_attributes(&self, uploaded: &[Uploaded]) -> Attributes {
        let slots = self.files.slots();
        uploaded
            .iter()
            .filter_map(|upload| {
                upload.path.as_ref().map(|path| {
                    (
                        slots[upload.slot].column(),
                        AttributeValue::Text(Some(path.clone())),
                    )
                })
            })
            .collect()
    }

    fn after_upload(&self, uploaded: &[Uploaded], attrs: &mut Attributes) -> AttachmentResult<()> {
        let slots = self.files.slots();
        for upload in uploaded {
            let attachment = &slots[upload.slot];
            for after in attachment.uploader().after_upload_hooks() {
                after(attachment.stash(), attachment.context(), attrs)?;
            }
        }
        Ok(())
    }

    /// Upload changed attachments under the configured worker budget
    ///
    /// Waits for every task before reporting the first failure. Slots are
    /// restored in all cases; a slot whose task panicked is left blank with
    /// its previous path.
    async fn dispatch(&mut self, operation: Operation) -> AttachmentResult<Vec<Uploaded>> {
        let throttle = Throttle::new(self.files.settings().concurrent_workers);

        let mut indices = Vec::new();
        let mut tasks = Vec::new();
        for (index, slot) in self.files.slots_mut().iter_mut().enumerate() {
            if !slot.changed() {
                continue;
            }

            let previous = match operation {
                Operation::Update => slot.persisted_path().map(str::to_string),
                _ => None,
            };
            let placeholder = slot.placeholder();
            let mut attachment = std::mem::replace(slot, placeholder);
            let hooks = self.hooks.clone();

            indices.push(index);
            tasks.push(async move {
                let outcome = upload(&mut attachment, previous, hooks).await;
                (attachment, outcome)
            });
        }

        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        debug!(tasks = tasks.len(), limit = ?self.files.settings().concurrent_workers, "Dispatching uploads");

        let results = throttle.run_all(tasks).await;

        let slots = self.files.slots_mut();
        let mut uploaded = Vec::new();
        let mut first_error = None;
        for (index, result) in indices.into_iter().zip(results) {
            match result {
                Ok((attachment, outcome)) => {
                    slots[index] = attachment;
                    match outcome {
                        Ok(path) => uploaded.push(Uploaded { slot: index, path }),
                        Err(e) => {
                            warn!(column = %slots[index].column(), error = %e, "Upload failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(e) => {
                    warn!(column = %slots[index].column(), error = %e, "Upload task failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(uploaded),
        }
    }
}

/// Write one attachment and register its compensating hooks
///
/// `previous` is the path persisted before this update, `None` on create.
async fn upload(
    attachment: &mut Attachment,
    previous: Option<String>,
    hooks: Arc<dyn TransactionHooks>,
) -> AttachmentResult<Option<String>> {
    let Some(processed) = attachment.prepare().await? else {
        return Ok(None);
    };

    let storage = attachment.settings().storage();
    let path = processed.path().to_string();

    match previous {
        Some(old) if old == path => {
            if storage.exists(&old).await? {
                let backup = join_path(
                    dirname(&old),
                    &uuid::Uuid::new_v4().simple().to_string(),
                );
                storage.cp(&old, &backup).await?;
                debug!(path = %old, backup = %backup, "Backed up overwritten file");

                hooks
                    .run_after_commit(delete_hook(storage.clone(), backup.clone()))
                    .await?;
                hooks
                    .run_after_rollback(restore_hook(storage.clone(), backup, old))
                    .await?;
            } else {
                hooks
                    .run_after_rollback(delete_hook(storage.clone(), path.clone()))
                    .await?;
            }
            processed.store(storage.as_ref()).await?;
        }
        previous => {
            hooks
                .run_after_rollback(delete_hook(storage.clone(), path.clone()))
                .await?;
            processed.store(storage.as_ref()).await?;

            if let Some(old) = previous {
                hooks
                    .run_after_commit(delete_hook(storage.clone(), old))
                    .await?;
            }
        }
    }

    debug!(column = %attachment.column(), path = %path, "Attachment uploaded");
    attachment.finish(path.clone());
    Ok(Some(path))
}

/// Delete `path`, treating an already missing object as done
fn delete_hook(storage: Arc<dyn Storage>, path: String) -> HookAction {
    hook(move || async move {
        match storage.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = AttachmentError::from(e);
                if e.is_file_not_present() {
                    debug!(path = %path, "Already deleted");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    })
}

/// Move the backup back over the overwritten path
fn restore_hook(storage: Arc<dyn Storage>, backup: String, path: String) -> HookAction {
    hook(move || async move {
        storage.mv(&backup, &path).await?;
        debug!(path = %path, "Restored overwritten file");
        Ok(())
    })
}
