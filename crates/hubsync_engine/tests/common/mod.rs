//! Shared fixture: one project provisioned on both sides.

#![allow(dead_code)]

use hubsync_engine::{
    AttributeMapping, AttributeType, Direction, LocalEntity, LocalProject, MemoryHub, MemoryRemote,
    ProjectStatus, RetryConfig, SyncConfig, SyncEngine, SyncReport,
};
use hubsync_model::fields::{
    AUTO_SYNC_FIELD, GROUPING_FIELD, LOCAL_ID_FIELD, PUSH_ATTRIB, SYNC_STATUS_FIELD,
};
use hubsync_model::{
    FieldDataType, FieldSchema, Fields, Notification, RemoteRecord, RemoteRef, RemoteType,
    TrackingSettings,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const PROJECT: &str = "demo";

pub type Engine = SyncEngine<MemoryRemote, MemoryHub>;

pub fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub struct Studio {
    pub engine: Arc<Engine>,
    pub project: RemoteRecord,
    pub animation: RemoteRecord,
}

/// Provisions the remote schema, a remote project with auto-sync on, two
/// pipeline steps, one user, and a local project with pushes enabled.
pub fn studio() -> Studio {
    studio_with([
        RemoteType::Sequence,
        RemoteType::Shot,
        RemoteType::Asset,
        RemoteType::Task,
        RemoteType::Version,
    ])
}

/// Same as [`studio`] with another set of enabled types.
///
/// Episodes, sequences and shots are all shown by the project, so a
/// disabled level still carries its navigation chain.
pub fn studio_with(enabled: impl IntoIterator<Item = RemoteType>) -> Studio {
    let remote = MemoryRemote::new();
    provision_schema(&remote);

    let project = remote.insert(
        RemoteType::Project,
        fields(&[
            ("code", json!(PROJECT)),
            ("name", json!("Demo")),
            (AUTO_SYNC_FIELD, json!(true)),
        ]),
    );
    let animation = remote.insert(RemoteType::Step, fields(&[("code", json!("Animation"))]));
    remote.insert(RemoteType::Step, fields(&[("code", json!("Layout"))]));
    remote.insert(RemoteType::HumanUser, fields(&[("login", json!("jdoe"))]));

    let mut settings = TrackingSettings::default();
    settings.navchains.insert("Sequence".into(), "Sequence.episode".into());
    settings.navchains.insert("Shot".into(), "Shot.sg_sequence".into());
    settings.navchains.insert("Asset".into(), "__flat__".into());
    settings.visible.extend([
        RemoteType::Episode,
        RemoteType::Sequence,
        RemoteType::Shot,
        RemoteType::Asset,
        RemoteType::Task,
    ]);
    remote.set_tracking(project.id, settings);

    let hub = MemoryHub::new();
    let mut local = LocalProject::new(PROJECT);
    local.folder_types = vec!["Episode".into(), "Sequence".into(), "Shot".into(), "Asset".into()];
    local.task_types = vec!["Animation".into(), "Layout".into()];
    local.statuses = vec![
        ProjectStatus::new("In progress", "ip"),
        ProjectStatus::new("Final", "fin"),
    ];
    local.attribs.insert(PUSH_ATTRIB.into(), json!(true));
    hub.add_project(local);

    let config = SyncConfig::new("https://tracking.example")
        .with_enabled_entities(enabled)
        .with_attribute(
            AttributeMapping::new("fps", "fps", AttributeType::Float).with_scope([RemoteType::Shot]),
        )
        .with_retry(RetryConfig::immediate(3));

    Studio {
        engine: Arc::new(SyncEngine::new(config, remote, hub)),
        project,
        animation,
    }
}

fn provision_schema(remote: &MemoryRemote) {
    let common = |kind: RemoteType, label: &str| {
        remote.add_field(kind, FieldSchema::new(label, FieldDataType::Text));
        remote.add_field(kind, FieldSchema::new("project", FieldDataType::Entity));
        remote.add_field(kind, FieldSchema::new(LOCAL_ID_FIELD, FieldDataType::Text));
        remote.add_field(kind, FieldSchema::new(SYNC_STATUS_FIELD, FieldDataType::List));
        remote.add_field(kind, FieldSchema::new("tags", FieldDataType::MultiEntity));
        remote.add_field(
            kind,
            FieldSchema::new("sg_status_list", FieldDataType::StatusList).with_valid_values(["ip", "fin"]),
        );
    };
    for kind in [
        RemoteType::Episode,
        RemoteType::Sequence,
        RemoteType::Shot,
        RemoteType::Asset,
        RemoteType::Version,
    ] {
        common(kind, "code");
    }
    common(RemoteType::Task, "content");

    remote.add_field(RemoteType::Sequence, FieldSchema::new("episode", FieldDataType::Entity));
    remote.add_field(RemoteType::Shot, FieldSchema::new("sg_sequence", FieldDataType::Entity));
    remote.add_field(RemoteType::Shot, FieldSchema::new("sg_fps", FieldDataType::Float));
    remote.add_field(RemoteType::Asset, FieldSchema::new(GROUPING_FIELD, FieldDataType::List));
    for kind in [RemoteType::Task, RemoteType::Version] {
        remote.add_field(kind, FieldSchema::new("entity", FieldDataType::Entity));
    }
    remote.add_field(RemoteType::Task, FieldSchema::new("step", FieldDataType::Entity));
    remote.add_field(RemoteType::Task, FieldSchema::new("task_assignees", FieldDataType::MultiEntity));

    for field in ["code", "name"] {
        remote.add_field(RemoteType::Project, FieldSchema::new(field, FieldDataType::Text));
    }
    remote.add_field(RemoteType::Project, FieldSchema::new(LOCAL_ID_FIELD, FieldDataType::Text));
    remote.add_field(RemoteType::Project, FieldSchema::new(SYNC_STATUS_FIELD, FieldDataType::List));
    remote.add_field(RemoteType::Project, FieldSchema::new(AUTO_SYNC_FIELD, FieldDataType::Checkbox));
}

impl Studio {
    pub fn remote(&self) -> &MemoryRemote {
        self.engine.remote()
    }

    pub fn hub(&self) -> &MemoryHub {
        self.engine.hub()
    }

    pub fn push(&self) -> SyncReport {
        self.engine
            .synchronize_project(PROJECT, Direction::LocalToRemote)
            .unwrap()
    }

    pub fn pull(&self) -> SyncReport {
        self.engine
            .synchronize_project(PROJECT, Direction::RemoteToLocal)
            .unwrap()
    }

    /// Inserts a folder record, optionally linked to a parent through `field`.
    pub fn add_remote(&self, kind: RemoteType, code: &str, parent: Option<(&str, RemoteRef)>) -> RemoteRecord {
        let mut data = fields(&[
            ("code", json!(code)),
            ("project", self.project.to_ref().to_value()),
        ]);
        if let Some((field, target)) = parent {
            data.insert(field.to_string(), target.to_value());
        }
        self.remote().insert(kind, data)
    }

    pub fn add_remote_asset(&self, code: &str, group: &str) -> RemoteRecord {
        self.remote().insert(
            RemoteType::Asset,
            fields(&[
                ("code", json!(code)),
                ("project", self.project.to_ref().to_value()),
                (GROUPING_FIELD, json!(group)),
            ]),
        )
    }

    /// Inserts an animation task under `owner`.
    pub fn add_remote_task(&self, content: &str, owner: RemoteRef) -> RemoteRecord {
        self.remote().insert(
            RemoteType::Task,
            fields(&[
                ("content", json!(content)),
                ("project", self.project.to_ref().to_value()),
                ("entity", owner.to_value()),
                (
                    "step",
                    json!({"type": "Step", "id": self.animation.id, "name": "Animation"}),
                ),
            ]),
        )
    }

    pub fn add_local(&self, entity: LocalEntity) {
        assert!(self.hub().add_entity(PROJECT, entity));
    }

    pub fn local(&self, id: &str) -> LocalEntity {
        self.hub().entity(PROJECT, id).unwrap()
    }

    pub fn locals(&self) -> Vec<LocalEntity> {
        self.hub().entities(PROJECT)
    }

    /// Local entity linked to a remote record.
    pub fn counterpart(&self, target: RemoteRef) -> Option<LocalEntity> {
        self.locals().into_iter().find(|e| e.remote_ref() == Some(target))
    }

    pub fn record(&self, target: RemoteRef) -> RemoteRecord {
        self.remote().record(target).unwrap()
    }

    pub fn remote_project(&self) -> RemoteRecord {
        self.record(self.project.to_ref())
    }

    pub fn local_event(&self, topic: &str, entity_id: &str, new_value: Value) -> Notification {
        Notification::from_topic(
            topic,
            json!({"project": PROJECT, "entityId": entity_id, "newValue": new_value}),
        )
        .unwrap()
    }

    /// Deletion event carrying the entity's last known cross-reference.
    pub fn local_deletion(&self, entity: &LocalEntity) -> Notification {
        let family = match entity.kind {
            hubsync_engine::LocalKind::Folder => "folder",
            hubsync_engine::LocalKind::Task => "task",
            hubsync_engine::LocalKind::Version => "version",
        };
        Notification::from_topic(
            &format!("entity.{family}.deleted"),
            json!({
                "project": PROJECT,
                "entityId": entity.id,
                "entityData": {"attrib": entity.attribs},
            }),
        )
        .unwrap()
    }

    pub fn remote_event(&self, event: &str, target: RemoteRef, attribute: Option<&str>, new_value: Value) -> Notification {
        Notification::from_topic(
            "remote.event",
            json!({
                "type": event,
                "entityType": target.kind.as_str(),
                "entityId": target.id,
                "projectId": self.project.id,
                "attributeName": attribute,
                "newValue": new_value,
            }),
        )
        .unwrap()
    }
}
