//! Test fixtures: a project provisioned on both sides.
//!
//! [`StudioBuilder`] sets up an in-memory remote service with the usual
//! production schema and an in-memory hub with a matching local project,
//! then wraps both in a [`SyncEngine`].

use hubsync_engine::{
    AttributeMapping, Direction, LocalEntity, LocalProject, MemoryHub, MemoryRemote, ProjectStatus,
    RetryConfig, SyncConfig, SyncEngine, SyncReport,
};
use hubsync_model::fields::{
    AUTO_SYNC_FIELD, FLAT_CHAIN, GROUPING_FIELD, LOCAL_ID_FIELD, PUSH_ATTRIB, SYNC_STATUS_FIELD,
};
use hubsync_model::{
    FieldDataType, FieldSchema, Fields, RemoteRecord, RemoteRef, RemoteType, TrackingSettings,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Engine over the in-memory clients.
pub type TestEngine = SyncEngine<MemoryRemote, MemoryHub>;

/// Project name used by every fixture.
pub const TEST_PROJECT: &str = "demo";

/// Pipeline steps provisioned remotely; also the local task types.
pub const STEPS: [&str; 2] = ["Animation", "Layout"];

/// Builds a field map from pairs.
pub fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Builder for [`TestStudio`].
#[derive(Debug, Clone)]
pub struct StudioBuilder {
    enabled: Vec<RemoteType>,
    visible: Vec<RemoteType>,
    navchains: Vec<(RemoteType, String)>,
    mappings: Vec<AttributeMapping>,
    auto_sync: bool,
    push: bool,
}

impl Default for StudioBuilder {
    fn default() -> Self {
        Self {
            enabled: vec![
                RemoteType::Sequence,
                RemoteType::Shot,
                RemoteType::Asset,
                RemoteType::Task,
                RemoteType::Version,
            ],
            visible: Vec::new(),
            navchains: vec![
                (RemoteType::Shot, "Shot.sg_sequence".into()),
                (RemoteType::Asset, FLAT_CHAIN.into()),
            ],
            mappings: Vec::new(),
            auto_sync: true,
            push: true,
        }
    }
}

impl StudioBuilder {
    /// Replaces the enabled remote types.
    #[must_use]
    pub fn enabled(mut self, types: impl IntoIterator<Item = RemoteType>) -> Self {
        self.enabled = types.into_iter().collect();
        self
    }

    /// Shows types in the project without enabling them.
    ///
    /// Enabled types other than versions are always shown.
    #[must_use]
    pub fn visible(mut self, types: impl IntoIterator<Item = RemoteType>) -> Self {
        self.visible.extend(types);
        self
    }

    /// Overrides the navigation chain of a type.
    #[must_use]
    pub fn navchain(mut self, kind: RemoteType, chain: &str) -> Self {
        self.navchains.retain(|(k, _)| *k != kind);
        self.navchains.push((kind, chain.to_string()));
        self
    }

    /// Adds a custom attribute mapping.
    #[must_use]
    pub fn mapping(mut self, mapping: AttributeMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Turns the remote project's auto-sync flag on or off.
    #[must_use]
    pub fn auto_sync(mut self, on: bool) -> Self {
        self.auto_sync = on;
        self
    }

    /// Turns local pushes on or off.
    #[must_use]
    pub fn push(mut self, on: bool) -> Self {
        self.push = on;
        self
    }

    /// Provisions both sides.
    pub fn build(self) -> TestStudio {
        let remote = MemoryRemote::new();
        provision_schema(&remote);

        let project = remote.insert(
            RemoteType::Project,
            fields(&[
                ("code", json!(TEST_PROJECT)),
                ("name", json!("Demo")),
                (AUTO_SYNC_FIELD, json!(self.auto_sync)),
            ]),
        );
        let steps = STEPS
            .iter()
            .map(|step| remote.insert(RemoteType::Step, fields(&[("code", json!(step))])))
            .collect();

        let mut settings = TrackingSettings::default();
        for (kind, chain) in &self.navchains {
            settings.navchains.insert(kind.as_str().to_string(), chain.clone());
        }
        settings
            .visible
            .extend(self.enabled.iter().copied().filter(|k| *k != RemoteType::Version));
        settings.visible.extend(self.visible.iter().copied());
        remote.set_tracking(project.id, settings);

        let hub = MemoryHub::new();
        let mut local = LocalProject::new(TEST_PROJECT);
        local.folder_types = ["Episode", "Sequence", "Shot", "Asset"].map(String::from).to_vec();
        local.task_types = STEPS.map(String::from).to_vec();
        local.statuses = vec![
            ProjectStatus::new("In progress", "ip"),
            ProjectStatus::new("Final", "fin"),
        ];
        local.attribs.insert(PUSH_ATTRIB.into(), json!(self.push));
        hub.add_project(local);

        let mut config = SyncConfig::new("https://tracking.test")
            .with_enabled_entities(self.enabled)
            .with_retry(RetryConfig::immediate(3));
        for mapping in self.mappings {
            config = config.with_attribute(mapping);
        }

        TestStudio {
            engine: Arc::new(SyncEngine::new(config, remote, hub)),
            project,
            steps,
        }
    }
}

fn provision_schema(remote: &MemoryRemote) {
    let tracked = |kind: RemoteType, label: &str| {
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
    for kind in [RemoteType::Episode, RemoteType::Sequence, RemoteType::Shot, RemoteType::Asset, RemoteType::Version] {
        tracked(kind, "code");
    }
    tracked(RemoteType::Task, "content");

    remote.add_field(RemoteType::Sequence, FieldSchema::new("episode", FieldDataType::Entity));
    remote.add_field(RemoteType::Shot, FieldSchema::new("sg_sequence", FieldDataType::Entity));
    remote.add_field(RemoteType::Shot, FieldSchema::new("sg_fps", FieldDataType::Float));
    remote.add_field(RemoteType::Asset, FieldSchema::new(GROUPING_FIELD, FieldDataType::List));
    for kind in [RemoteType::Task, RemoteType::Version] {
        remote.add_field(kind, FieldSchema::new("entity", FieldDataType::Entity));
    }
    remote.add_field(RemoteType::Task, FieldSchema::new("step", FieldDataType::Entity));
    remote.add_field(RemoteType::Task, FieldSchema::new("task_assignees", FieldDataType::MultiEntity));

    for field in ["code", "name", LOCAL_ID_FIELD] {
        remote.add_field(RemoteType::Project, FieldSchema::new(field, FieldDataType::Text));
    }
    remote.add_field(RemoteType::Project, FieldSchema::new(SYNC_STATUS_FIELD, FieldDataType::List));
    remote.add_field(RemoteType::Project, FieldSchema::new(AUTO_SYNC_FIELD, FieldDataType::Checkbox));
}

/// A provisioned project on both sides of an engine.
pub struct TestStudio {
    /// The engine.
    pub engine: Arc<TestEngine>,
    /// The remote project record as provisioned.
    pub project: RemoteRecord,
    /// Remote pipeline steps, in [`STEPS`] order.
    pub steps: Vec<RemoteRecord>,
}

impl TestStudio {
    /// Studio with the default settings.
    pub fn new() -> Self {
        StudioBuilder::default().build()
    }

    /// Builder for a customized studio.
    pub fn builder() -> StudioBuilder {
        StudioBuilder::default()
    }

    /// Remote side.
    pub fn remote(&self) -> &MemoryRemote {
        self.engine.remote()
    }

    /// Local side.
    pub fn hub(&self) -> &MemoryHub {
        self.engine.hub()
    }

    /// Runs a pass and panics on run-level failure.
    pub fn run(&self, direction: Direction) -> SyncReport {
        self.engine
            .synchronize_project(TEST_PROJECT, direction)
            .unwrap_or_else(|e| panic!("{direction} pass failed: {e}"))
    }

    /// Local-to-remote pass.
    pub fn push(&self) -> SyncReport {
        self.run(Direction::LocalToRemote)
    }

    /// Remote-to-local pass.
    pub fn pull(&self) -> SyncReport {
        self.run(Direction::RemoteToLocal)
    }

    /// Reference to the remote project.
    pub fn project_ref(&self) -> RemoteRef {
        self.project.to_ref()
    }

    /// Inserts a remote folder-like record in the project.
    pub fn add_remote(&self, kind: RemoteType, code: &str, parent: Option<(&str, RemoteRef)>) -> RemoteRecord {
        let mut data = fields(&[("code", json!(code)), ("project", self.project_ref().to_value())]);
        if let Some((field, target)) = parent {
            data.insert(field.to_string(), target.to_value());
        }
        self.remote().insert(kind, data)
    }

    /// Inserts a remote asset filed under a category.
    pub fn add_remote_asset(&self, code: &str, category: &str) -> RemoteRecord {
        self.remote().insert(
            RemoteType::Asset,
            fields(&[
                ("code", json!(code)),
                ("project", self.project_ref().to_value()),
                (GROUPING_FIELD, json!(category)),
            ]),
        )
    }

    /// Inserts a remote task for the step at `step` in [`STEPS`].
    pub fn add_remote_task(&self, content: &str, owner: RemoteRef, step: usize) -> RemoteRecord {
        let step = &self.steps[step];
        self.remote().insert(
            RemoteType::Task,
            fields(&[
                ("content", json!(content)),
                ("project", self.project_ref().to_value()),
                ("entity", owner.to_value()),
                ("step", json!({"type": "Step", "id": step.id, "name": step.str_field("code")})),
            ]),
        )
    }

    /// Adds a local entity; panics if the project is missing.
    pub fn add_local(&self, entity: LocalEntity) {
        assert!(self.hub().add_entity(TEST_PROJECT, entity), "project '{TEST_PROJECT}' is missing");
    }

    /// Local entities, parents first.
    pub fn locals(&self) -> Vec<LocalEntity> {
        self.hub().entities(TEST_PROJECT)
    }

    /// A local entity by id.
    pub fn local(&self, id: &str) -> Option<LocalEntity> {
        self.hub().entity(TEST_PROJECT, id)
    }

    /// Local entity linked to a remote record.
    pub fn counterpart(&self, target: RemoteRef) -> Option<LocalEntity> {
        self.locals().into_iter().find(|e| e.remote_ref() == Some(target))
    }

    /// Active remote records of the project, of the enabled types.
    pub fn remote_tree(&self) -> Vec<RemoteRecord> {
        let project = self.project_ref();
        let mut records: Vec<RemoteRecord> = self
            .engine
            .config()
            .enabled_entities
            .iter()
            .flat_map(|kind| self.remote().records(*kind))
            .filter(|r| r.link("project") == Some(project))
            .collect();
        records.sort_by_key(RemoteRecord::to_ref);
        records
    }
}

impl Default for TestStudio {
    fn default() -> Self {
        Self::new()
    }
}

/// Ready-made scenarios.
pub mod scenarios {
    use super::*;

    /// Local episode/sequence/shot chain with one animation task per shot.
    ///
    /// Ids are `ep`, `sq{i}`, `sh{i}{j}` and `tk{i}{j}`.
    pub fn local_episode(studio: &TestStudio, sequences: usize, shots: usize) {
        studio.add_local(LocalEntity::folder("ep", None, "Episode", "ep01"));
        for i in 0..sequences {
            let sq = format!("sq{i}");
            studio.add_local(LocalEntity::folder(sq.as_str(), Some("ep"), "Sequence", &format!("sq{:03}", (i + 1) * 10)));
            for j in 0..shots {
                let sh = format!("sh{i}{j}");
                studio.add_local(LocalEntity::folder(sh.as_str(), Some(sq.as_str()), "Shot", &format!("sh{:03}", (j + 1) * 10)));
                studio.add_local(LocalEntity::task(format!("tk{i}{j}"), Some(sh.as_str()), STEPS[0], "animation"));
            }
        }
    }

    /// Remote assets spread over categories, `per_category` each.
    pub fn remote_library(studio: &TestStudio, categories: &[&str], per_category: usize) -> Vec<RemoteRecord> {
        let mut assets = Vec::new();
        for category in categories {
            for n in 0..per_category {
                let code = format!("{}_{n:02}", category.to_lowercase());
                assets.push(studio.add_remote_asset(&code, category));
            }
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_engine::{OutcomeKind, ReactorState};
    use hubsync_model::Notification;

    #[test]
    fn studio_is_ready_for_both_directions() {
        let studio = TestStudio::new();
        assert!(studio.locals().is_empty());
        assert!(studio.remote_tree().is_empty());
        assert!(studio.pull().is_synced());
        assert!(studio.push().is_synced());
    }

    #[test]
    fn episode_scenario_pushes_cleanly() {
        let studio = TestStudio::builder()
            .enabled([
                RemoteType::Episode,
                RemoteType::Sequence,
                RemoteType::Shot,
                RemoteType::Task,
            ])
            .navchain(RemoteType::Sequence, "Sequence.episode")
            .build();
        scenarios::local_episode(&studio, 2, 2);
        let report = studio.push();
        assert!(report.is_synced(), "{report}");
        assert_eq!(report.count(OutcomeKind::Created), 1 + 2 + 4 + 4);
        assert_eq!(studio.remote_tree().len(), 11);
    }

    #[test]
    fn builder_controls_reactions() {
        let studio = TestStudio::builder().auto_sync(false).build();
        let shot = studio.add_remote(RemoteType::Shot, "sh010", None);
        let event = Notification::from_topic(
            "remote.event",
            json!({
                "type": "new_entity",
                "entityType": "Shot",
                "entityId": shot.id,
                "projectId": studio.project.id,
            }),
        )
        .unwrap();
        let reaction = studio.engine.react_to_change(&event).unwrap();
        assert_eq!(reaction.state, ReactorState::Rejected);
        assert!(studio.counterpart(shot.to_ref()).is_none());
    }
}
