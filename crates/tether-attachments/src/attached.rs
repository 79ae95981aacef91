//! Attachments owned by one record

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tether_core::RecordRef;
use tracing::debug;

use crate::attachment::Attachment;
use crate::context::UploadContext;
use crate::error::{AttachmentError, AttachmentResult};
use crate::persistence::PersistenceLayer;
use crate::settings::Settings;
use crate::source::SourceHandle;
use crate::uploader::Uploader;

/// An attachment declared on a record type
#[derive(Debug, Clone)]
pub struct AttachmentDefinition {
    name: String,
    uploader: Arc<Uploader>,
    follows: Option<String>,
}

impl AttachmentDefinition {
    pub fn new(name: impl Into<String>, uploader: impl Into<Arc<Uploader>>) -> Self {
        Self {
            name: name.into(),
            uploader: uploader.into(),
            follows: None,
        }
    }

    /// Take the source of another attachment whenever it is assigned
    pub fn follows(mut self, target: impl Into<String>) -> Self {
        self.follows = Some(target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uploader(&self) -> &Arc<Uploader> {
        &self.uploader
    }
}

/// Every `(attachment, version)` slot of a record, in declaration order
#[derive(Debug)]
pub struct AttachedFiles {
    definitions: Vec<AttachmentDefinition>,
    settings: Settings,
    record: RecordRef,
    slots: Vec<Attachment>,
}

impl AttachedFiles {
    pub fn new(
        definitions: Vec<AttachmentDefinition>,
        settings: Settings,
        record: RecordRef,
    ) -> AttachmentResult<Self> {
        check_definitions(&definitions)?;

        let slots = definitions
            .iter()
            .flat_map(|definition| {
                let settings = settings.clone();
                let record = record.clone();
                std::iter::once(None)
                    .chain(definition.uploader.versions().iter().cloned().map(Some))
                    .map(move |version| {
                        Attachment::new(
                            definition.uploader.clone(),
                            settings.clone(),
                            UploadContext::new(record.clone(), definition.name.clone(), version),
                        )
                    })
            })
            .collect();

        Ok(Self {
            definitions,
            settings,
            record,
            slots,
        })
    }

    /// Build the slots and seed paths from a persisted record
    pub async fn load(
        definitions: Vec<AttachmentDefinition>,
        settings: Settings,
        layer: &dyn PersistenceLayer,
    ) -> AttachmentResult<Self> {
        let mut files = Self::new(definitions, settings, layer.record())?;
        files.reload(layer).await?;
        Ok(files)
    }

    /// Discard in-memory changes and read every path column again
    pub async fn reload(&mut self, layer: &dyn PersistenceLayer) -> AttachmentResult<()> {
        self.set_record(layer.record());

        let persisted = layer.is_persisted();
        for slot in &mut self.slots {
            let path = if persisted {
                layer.read(&slot.column()).await?
            } else {
                None
            };
            slot.set_path(path);
        }

        debug!(record = %self.record, slots = self.slots.len(), "Attachments loaded");
        Ok(())
    }

    /// Point every slot at `record`, e.g. once an insert assigned an id
    pub fn set_record(&mut self, record: RecordRef) {
        for slot in &mut self.slots {
            slot.set_record(record.clone());
        }
        self.record = record;
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn definitions(&self) -> &[AttachmentDefinition] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<&Attachment> {
        self.get_version(name, None)
    }

    pub fn get_version(&self, name: &str, version: Option<&str>) -> Option<&Attachment> {
        self.slots
            .iter()
            .find(|slot| slot.context().attached_as == name && slot.version() == version)
    }

    pub fn get_mut(&mut self, name: &str, version: Option<&str>) -> Option<&mut Attachment> {
        self.slots
            .iter_mut()
            .find(|slot| slot.context().attached_as == name && slot.version() == version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn changed(&self) -> bool {
        self.slots.iter().any(Attachment::changed)
    }

    pub(crate) fn slots(&self) -> &[Attachment] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Attachment] {
        &mut self.slots
    }

    /// Assign a source to an attachment
    ///
    /// Its versions and the attachments following it take the same source
    /// unless they were assigned something else since their last write.
    pub fn assign(&mut self, name: &str, source: SourceHandle) -> AttachmentResult<()> {
        let primary = self
            .get_mut(name, None)
            .ok_or_else(|| unknown_attachment(name))?;
        primary.assign(source.clone());

        let mut queue = vec![name.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }

            for slot in &mut self.slots {
                let context = slot.context();
                let follows = context.attached_as != current
                    && self
                        .definitions
                        .iter()
                        .any(|d| d.name == context.attached_as && d.follows.as_deref() == Some(current.as_str()));
                let is_version = context.attached_as == current && context.version.is_some();

                if (is_version || follows) && !slot.changed() {
                    slot.assign(source.clone());
                }
            }

            queue.extend(
                self.definitions
                    .iter()
                    .filter(|d| d.follows.as_deref() == Some(current.as_str()))
                    .map(|d| d.name.clone()),
            );
        }

        Ok(())
    }

    /// Assign a source to a single version only
    pub fn assign_version(
        &mut self,
        name: &str,
        version: &str,
        source: SourceHandle,
    ) -> AttachmentResult<()> {
        let slot = self.get_mut(name, Some(version)).ok_or_else(|| {
            AttachmentError::Configuration(format!(
                "attachment '{}' has no version '{}'",
                name, version
            ))
        })?;
        slot.assign(source);
        Ok(())
    }
}

fn unknown_attachment(name: &str) -> AttachmentError {
    AttachmentError::Configuration(format!("unknown attachment '{}'", name))
}

fn check_definitions(definitions: &[AttachmentDefinition]) -> AttachmentResult<()> {
    let mut names = HashSet::new();
    for definition in definitions {
        if !names.insert(definition.name.as_str()) {
            return Err(AttachmentError::Configuration(format!(
                "attachment '{}' is declared more than once",
                definition.name
            )));
        }
    }

    let follows: HashMap<&str, &str> = definitions
        .iter()
        .filter_map(|d| d.follows.as_deref().map(|target| (d.name.as_str(), target)))
        .collect();

    for (name, target) in &follows {
        if !names.contains(target) {
            return Err(AttachmentError::Configuration(format!(
                "attachment '{}' follows unknown attachment '{}'",
                name, target
            )));
        }

        let mut seen = HashSet::from([*name]);
        let mut next = Some(*target);
        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(AttachmentError::Configuration(format!(
                    "attachment '{}' is part of a follow cycle",
                    name
                )));
            }
            next = follows.get(current).copied();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::AttachmentState;
    use crate::persistence::MemoryRecord;
    use crate::source::StringSource;
    use tether_storage::MemoryStorage;

    fn uploader(versions: &[&'static str]) -> Arc<Uploader> {
        let mut builder = Uploader::builder().store_dir_static("/d");
        for version in versions {
            builder = builder.version(*version, |v| v);
        }
        Arc::new(builder.build().unwrap())
    }

    fn settings() -> Settings {
        Settings::new(Arc::new(MemoryStorage::new()))
    }

    fn source(value: &'static str) -> SourceHandle {
        SourceHandle::new(StringSource::with_filename(value, "a.txt"))
    }

    #[test]
    fn test_slots_and_columns() {
        let files = AttachedFiles::new(
            vec![
                AttachmentDefinition::new("image", uploader(&["thumb", "large"])),
                AttachmentDefinition::new("document", uploader(&[])),
            ],
            settings(),
            RecordRef::unsaved("Post"),
        )
        .unwrap();

        let columns: Vec<String> = files.iter().map(Attachment::column).collect();
        assert_eq!(columns, vec!["image", "image_thumb", "image_large", "document"]);
    }

    #[test]
    fn test_assign_propagates_to_unchanged_versions() {
        let mut files = AttachedFiles::new(
            vec![AttachmentDefinition::new("image", uploader(&["thumb", "large"]))],
            settings(),
            RecordRef::unsaved("Post"),
        )
        .unwrap();

        let explicit = source("explicit");
        files.assign_version("image", "thumb", explicit.clone()).unwrap();

        let shared = source("shared");
        files.assign("image", shared.clone()).unwrap();

        assert_eq!(files.get("image").unwrap().source(), Some(&shared));
        assert_eq!(files.get_version("image", Some("large")).unwrap().source(), Some(&shared));
        assert_eq!(files.get_version("image", Some("thumb")).unwrap().source(), Some(&explicit));
    }

    #[test]
    fn test_followers() {
        let mut files = AttachedFiles::new(
            vec![
                AttachmentDefinition::new("image", uploader(&[])),
                AttachmentDefinition::new("preview", uploader(&["small"])).follows("image"),
                AttachmentDefinition::new("archive", uploader(&[])).follows("preview"),
            ],
            settings(),
            RecordRef::unsaved("Post"),
        )
        .unwrap();

        let shared = source("shared");
        files.assign("image", shared.clone()).unwrap();

        for slot in files.iter() {
            assert_eq!(slot.source(), Some(&shared), "{}", slot.column());
        }
    }

    #[test]
    fn test_invalid_definitions() {
        let duplicate = AttachedFiles::new(
            vec![
                AttachmentDefinition::new("image", uploader(&[])),
                AttachmentDefinition::new("image", uploader(&[])),
            ],
            settings(),
            RecordRef::unsaved("Post"),
        );
        assert!(matches!(duplicate, Err(AttachmentError::Configuration(_))));

        let unknown = AttachedFiles::new(
            vec![AttachmentDefinition::new("preview", uploader(&[])).follows("image")],
            settings(),
            RecordRef::unsaved("Post"),
        );
        assert!(matches!(unknown, Err(AttachmentError::Configuration(_))));

        let cycle = AttachedFiles::new(
            vec![
                AttachmentDefinition::new("a", uploader(&[])).follows("b"),
                AttachmentDefinition::new("b", uploader(&[])).follows("a"),
            ],
            settings(),
            RecordRef::unsaved("Post"),
        );
        assert!(matches!(cycle, Err(AttachmentError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_load_seeds_paths() {
        let record = MemoryRecord::persisted("Post", 2)
            .with_column("image", "/d/a.png")
            .with_column("image_thumb", "/d/thumb_a.png");

        let files = AttachedFiles::load(
            vec![AttachmentDefinition::new("image", uploader(&["thumb"]))],
            settings(),
            &record,
        )
        .await
        .unwrap();

        let image = files.get("image").unwrap();
        assert_eq!(image.persisted_path(), Some("/d/a.png"));
        assert_eq!(image.state(), AttachmentState::Persisted);
        assert_eq!(image.context().record.id, Some(2));
        assert_eq!(
            files.get_version("image", Some("thumb")).unwrap().persisted_path(),
            Some("/d/thumb_a.png")
        );
        assert!(!files.changed());
    }

    #[test]
    fn test_assign_unknown() {
        let mut files =
            AttachedFiles::new(vec![], settings(), RecordRef::unsaved("Post")).unwrap();
        assert!(files.assign("nope", source("x")).is_err());
    }
}
