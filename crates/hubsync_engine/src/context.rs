//! Working state of one full-tree pass or one notification.

use crate::attributes::AttributeMapper;
use crate::client::{LocalHub, RemoteClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::hierarchy::HierarchyResolver;
use crate::local::{remote_id_value, LocalEntity, LocalKind, LocalProject, LocalTree};
use crate::projection::label_field;
use crate::report::{OutcomeKind, SyncReport};
use crate::schema::SchemaCache;
use crate::xref::CrossReferenceStore;
use hubsync_model::fields::{
    AUTO_SYNC_FIELD, ENTITY_FIELD, GROUPING_FIELD, GROUPING_FOLDER_TYPE, GROUPING_TYPE, LOCAL_ID_FIELD,
    PROJECT_FIELD, REMOTE_ID_ATTRIB, REMOTE_TYPE_ATTRIB, REMOVED, SYNC_STATUS_FIELD,
};
use hubsync_model::{slug_key, Fields, Filter, RemoteRecord, RemoteRef, RemoteType, SyncEntity, SyncStatus};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Where a local entity's counterpart hangs on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteParent {
    /// Directly under the project.
    Project,
    /// Under a remote record.
    Record(RemoteRef),
    /// Inside a grouping, by discriminator label.
    Grouping(String),
}

/// Everything one run reads and buffers.
///
/// Rebuilt from both stores for every run; nothing survives it.
pub(crate) struct RunContext<'a, R: RemoteClient + ?Sized, L: LocalHub + ?Sized> {
    pub remote: &'a R,
    pub hub: &'a L,
    pub config: &'a SyncConfig,
    pub resolver: HierarchyResolver,
    pub mapper: AttributeMapper,
    pub cache: SchemaCache,
    pub report: SyncReport,
    pub remote_project: RemoteRecord,
    pub local: LocalTree,
    cancelled: &'a AtomicBool,
}

impl<'a, R: RemoteClient + ?Sized, L: LocalHub + ?Sized> RunContext<'a, R, L> {
    /// Loads a project from both sides and checks run preconditions.
    pub fn open(
        remote: &'a R,
        hub: &'a L,
        config: &'a SyncConfig,
        project: &str,
        cancelled: &'a AtomicBool,
    ) -> SyncResult<Self> {
        validate_project_name(project)?;
        let local = LocalTree::load(hub, project)?;
        let remote_project = find_remote_project(remote, config, local.project())?;
        let settings = remote.tracking_settings(remote_project.id)?;
        let resolver = HierarchyResolver::new(settings, config.enabled_entities.iter().copied());

        let mut cache = SchemaCache::new();
        check_required_fields(remote, &mut cache, &resolver)?;

        let mapper = AttributeMapper::new(config.attribute_mappings(), local.project().statuses.clone());
        debug!(project = %project, remote_project = remote_project.id, "opened run context");

        Ok(Self {
            remote,
            hub,
            config,
            resolver,
            mapper,
            cache,
            report: SyncReport::new(project),
            remote_project,
            local,
            cancelled,
        })
    }

    pub fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn xref(&self) -> CrossReferenceStore<'a, R> {
        CrossReferenceStore::new(self.remote)
    }

    pub fn project_name(&self) -> String {
        self.local.project().name.clone()
    }

    /// Whether the remote project accepts automatic synchronization.
    pub fn auto_sync_enabled(&self) -> bool {
        self.remote_project.flag(AUTO_SYNC_FIELD)
    }

    /// Finds or creates the local folder of a grouping discriminator.
    pub fn ensure_local_grouping(&mut self, label: &str) -> (String, OutcomeKind) {
        let slug = slug_key(label);
        let existing = self
            .local
            .find_child(None, LocalKind::Folder, &slug, |e| {
                e.is_grouping() || e.folder_type.as_deref() == Some(GROUPING_FOLDER_TYPE)
            })
            .map(|e| (e.id.clone(), e.is_grouping()));

        match existing {
            Some((id, true)) => (id, OutcomeKind::Unchanged),
            Some((id, false)) => {
                self.local
                    .set_attribute(&id, REMOTE_TYPE_ATTRIB, Value::String(GROUPING_TYPE.to_string()));
                (id, OutcomeKind::Updated)
            }
            None => {
                self.local.ensure_folder_type(GROUPING_FOLDER_TYPE);
                let id = self
                    .local
                    .add_folder(None, GROUPING_FOLDER_TYPE, &slug, label.trim(), None);
                self.local
                    .set_attribute(&id, REMOTE_TYPE_ATTRIB, Value::String(GROUPING_TYPE.to_string()));
                debug!(grouping = %slug, "created grouping folder");
                (id, OutcomeKind::Created)
            }
        }
    }

    /// Nearest ancestor of a local entity that has a place on the remote side.
    ///
    /// Removed, unmapped and disabled ancestors are passed through. A mapped
    /// ancestor without a counterpart yet is not ready.
    pub fn remote_parent_of(&mut self, entity: &LocalEntity) -> SyncResult<RemoteParent> {
        let mut next = entity.parent_id.clone();
        while let Some(parent_id) = next {
            let Some(parent) = self.local.get_or_query(self.hub, &parent_id)? else {
                return Err(SyncError::NotFound(format!("parent {parent_id} of {}", entity.describe())));
            };
            if parent.is_grouping() {
                return Ok(RemoteParent::Grouping(parent.label.clone()));
            }
            let mapped = parent
                .remote_type()
                .is_some_and(|kind| self.resolver.is_enabled(kind));
            if mapped && !parent.is_removed() {
                return match parent.remote_ref() {
                    Some(r) => Ok(RemoteParent::Record(r)),
                    None => Err(SyncError::ParentNotReady {
                        entity: entity.describe(),
                        parent: parent.describe(),
                    }),
                };
            }
            next = parent.parent_id.clone();
        }
        Ok(RemoteParent::Project)
    }

    /// Creates the remote counterpart of a local entity.
    ///
    /// The back-reference and status are written in the same request.
    pub fn create_remote(
        &mut self,
        entity: &LocalEntity,
        kind: RemoteType,
        parent: &RemoteParent,
    ) -> SyncResult<RemoteRecord> {
        let mut data = self
            .mapper
            .to_remote(self.remote, &mut self.cache, &entity.sync_attributes(), kind)?;
        data.insert(PROJECT_FIELD.to_string(), self.remote_project.to_ref().to_value());
        data.insert(label_field(kind).to_string(), Value::String(entity.label.clone()));

        match kind {
            RemoteType::Task | RemoteType::Version => {
                let RemoteParent::Record(owner) = parent else {
                    return Err(SyncError::Unclassifiable {
                        entity: entity.describe(),
                        reason: "not under a synchronized folder".to_string(),
                    });
                };
                data.insert(ENTITY_FIELD.to_string(), owner.to_value());
                if kind == RemoteType::Task {
                    let task_type = entity.task_type.as_deref().unwrap_or_default();
                    let step = self
                        .cache
                        .step_for(self.remote, task_type)?
                        .ok_or_else(|| SyncError::Unclassifiable {
                            entity: entity.describe(),
                            reason: format!("no pipeline step for task type '{task_type}'"),
                        })?;
                    let mut link = step.to_ref().to_value();
                    if let Some(code) = step.str_field("code") {
                        link["name"] = Value::String(code.to_string());
                    }
                    data.insert("step".to_string(), link);
                }
            }
            _ => {
                let field = self.resolver.parent_field_for(kind);
                match parent {
                    RemoteParent::Record(owner) if field != PROJECT_FIELD => {
                        data.insert(field, owner.to_value());
                    }
                    RemoteParent::Grouping(label) if kind == RemoteType::Asset => {
                        data.insert(GROUPING_FIELD.to_string(), Value::String(label.clone()));
                    }
                    _ => {}
                }
            }
        }

        data.insert(LOCAL_ID_FIELD.to_string(), Value::String(entity.id.clone()));
        data.insert(
            SYNC_STATUS_FIELD.to_string(),
            Value::String(SyncStatus::Synced.as_str().to_string()),
        );
        let record = self.remote.create(kind, &data)?;
        info!(
            project = %self.report.project,
            local_id = %entity.id,
            remote_id = record.id,
            "created remote {}",
            kind
        );
        Ok(record)
    }

    /// Remote fields of `record` that differ from the local entity.
    pub fn remote_changes(&mut self, entity: &LocalEntity, record: &RemoteRecord) -> SyncResult<Fields> {
        let mut wanted = self
            .mapper
            .to_remote(self.remote, &mut self.cache, &entity.sync_attributes(), record.kind)?;
        wanted.insert(
            label_field(record.kind).to_string(),
            Value::String(entity.label.clone()),
        );
        wanted.retain(|field, value| record.fields.get(field) != Some(&*value));
        Ok(wanted)
    }

    /// Buffers the local counterpart of a projected remote record.
    ///
    /// `reuse` is the record's back-reference, adopted as the new id so an
    /// interrupted run converges on the same entity.
    pub fn create_local(
        &mut self,
        record: &RemoteRecord,
        entity: &SyncEntity,
        parent: Option<&str>,
        reuse: Option<String>,
    ) -> SyncResult<String> {
        let reuse = reuse.filter(|id| id != REMOVED && self.local.get(id).is_none());
        let id = match record.kind {
            RemoteType::Task | RemoteType::Version => {
                let Some(owner) = parent else {
                    return Err(SyncError::Unclassifiable {
                        entity: record.to_string(),
                        reason: "not under a synchronized folder".to_string(),
                    });
                };
                if record.kind == RemoteType::Version {
                    self.local.add_version(owner, &entity.name, &entity.label, reuse)
                } else {
                    let task_type = entity.task_type.as_deref().unwrap_or_default();
                    self.local.ensure_task_type(task_type);
                    self.local
                        .add_task(Some(owner), task_type, &entity.name, &entity.label, reuse)
                }
            }
            kind => {
                self.local.ensure_folder_type(kind.as_str());
                self.local
                    .add_folder(parent, kind.as_str(), &entity.name, &entity.label, reuse)
            }
        };
        self.apply_remote_values(&id, record, &entity.label)?;
        debug!(local_id = %id, remote = %record, "created local entity");
        Ok(id)
    }

    /// Copies the label and mapped attributes of a record onto a local entity.
    /// Returns true if anything changed.
    pub fn apply_remote_values(&mut self, id: &str, record: &RemoteRecord, label: &str) -> SyncResult<bool> {
        let mut changed = self.local.set_label(id, label);
        for (key, value) in self.mapper.to_local(self.remote, &mut self.cache, record)? {
            changed |= self.local.set_attribute(id, &key, value);
        }
        Ok(changed)
    }

    /// Records with a parent link to `target`.
    pub fn has_remote_dependents(&self, target: RemoteRef) -> SyncResult<bool> {
        let mut kinds = self.resolver.tree_types();
        kinds.push(RemoteType::Version);
        for kind in kinds {
            let field = self.resolver.parent_field_for(kind);
            if field == PROJECT_FIELD {
                continue;
            }
            if self.remote.find_one(kind, &[Filter::link(field, target)])?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Local entity linked to a remote record.
    ///
    /// Tries the record's back-reference, then scans the loaded tree.
    pub fn local_of(&mut self, record: &RemoteRecord) -> SyncResult<Option<LocalEntity>> {
        if let Some(local_id) = self.xref().get(record).map(str::to_string) {
            if let Some(entity) = self.local.get_or_query(self.hub, &local_id)? {
                return Ok(Some(entity));
            }
        }
        let target = record.to_ref();
        Ok(self
            .local
            .entities()
            .find(|e| e.remote_ref() == Some(target))
            .cloned())
    }

    /// Ends a full-tree pass.
    ///
    /// Stages the project cross-reference, commits the local working set in
    /// one call, then writes the project back-reference and the final status
    /// to the remote project. A failed commit still writes `Failed`.
    pub fn conclude(mut self) -> SyncResult<SyncReport> {
        let project_ref = self.remote_project.to_ref();
        self.local
            .set_project_attribute(REMOTE_ID_ATTRIB, remote_id_value(project_ref.id));
        self.local.set_project_attribute(
            REMOTE_TYPE_ATTRIB,
            Value::String(RemoteType::Project.as_str().to_string()),
        );

        if let Err(e) = self.local.commit(self.hub) {
            self.report.downgrade(format!("local commit failed: {e}"));
            self.write_project_status();
            return Err(e);
        }

        let name = self.project_name();
        if self.remote_project.str_field(LOCAL_ID_FIELD) != Some(name.as_str()) {
            let mut fields = Fields::new();
            fields.insert(LOCAL_ID_FIELD.to_string(), Value::String(name));
            match self.remote.update(project_ref.kind, project_ref.id, &fields) {
                Ok(updated) => self.remote_project = updated,
                Err(e) => {
                    warn!(project = %self.report.project, error = %e, "failed to write project back-reference");
                    self.report
                        .downgrade(format!("project back-reference write failed: {e}"));
                }
            }
        }
        self.write_project_status();
        info!(project = %self.report.project, status = %self.report.status, "pass finished");
        Ok(self.report)
    }

    fn write_project_status(&mut self) {
        let status = self.report.status;
        let mut project = self.remote_project.clone();
        self.xref().write_status(&mut project, status, &mut self.report);
        self.remote_project = project;
    }
}

/// Project names are limited to ASCII letters, digits and underscores.
pub(crate) fn validate_project_name(name: &str) -> SyncResult<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(SyncError::precondition(format!(
            "project name '{name}' must match ^[a-zA-Z0-9_]+$"
        )))
    }
}

/// Finds the remote project paired with a local project.
///
/// Tries the recorded remote id, then the remote back-reference, then the
/// configured code field.
pub(crate) fn find_remote_project<R: RemoteClient + ?Sized>(
    remote: &R,
    config: &SyncConfig,
    project: &LocalProject,
) -> SyncResult<RemoteRecord> {
    if let Some(linked) = project.remote_ref() {
        if let Some(record) = remote.find_one(RemoteType::Project, &[Filter::id(linked.id)])? {
            return Ok(record);
        }
    }
    if let Some(record) = remote.find_one(RemoteType::Project, &[Filter::is(LOCAL_ID_FIELD, project.name.as_str())])? {
        return Ok(record);
    }
    for code in [&project.name, &project.code] {
        if let Some(record) = remote.find_one(
            RemoteType::Project,
            &[Filter::is(config.project_code_field.as_str(), code.as_str())],
        )? {
            return Ok(record);
        }
    }
    Err(SyncError::precondition(format!(
        "project '{}' does not exist on the remote side",
        project.name
    )))
}

/// Fields every run depends on.
pub(crate) fn check_required_fields<R: RemoteClient + ?Sized>(
    remote: &R,
    cache: &mut SchemaCache,
    resolver: &HierarchyResolver,
) -> SyncResult<()> {
    let mut required = vec![
        (RemoteType::Project, LOCAL_ID_FIELD),
        (RemoteType::Project, SYNC_STATUS_FIELD),
        (RemoteType::Project, AUTO_SYNC_FIELD),
    ];
    for kind in resolver.tree_types() {
        required.push((kind, LOCAL_ID_FIELD));
        required.push((kind, SYNC_STATUS_FIELD));
    }

    let mut missing = Vec::new();
    for (kind, field) in required {
        if cache.field(remote, kind, field)?.is_none() {
            missing.push(format!("{kind}.{field}"));
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::precondition(format!(
            "remote schema is missing {}",
            missing.join(", ")
        )))
    }
}
