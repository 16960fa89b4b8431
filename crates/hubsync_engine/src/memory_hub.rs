//! In-memory local hub.

use crate::client::LocalHub;
use crate::error::{SyncError, SyncResult};
use crate::local::{ChangeSet, LocalEntity, LocalKind, LocalProject};
use hubsync_model::slug_key;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One project and its entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    /// The project.
    pub project: LocalProject,
    /// Its entities, in insertion order.
    #[serde(default)]
    pub entities: Vec<LocalEntity>,
}

/// Serializable state of a [`MemoryHub`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    /// All projects.
    #[serde(default)]
    pub projects: Vec<ProjectSnapshot>,
}

/// An in-memory [`LocalHub`] for tests and offline runs.
///
/// Commits are validated against a copy of the project and swapped in only
/// when every change applies, so a failed commit leaves nothing behind.
#[derive(Default)]
pub struct MemoryHub {
    projects: RwLock<BTreeMap<String, ProjectSnapshot>>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a hub from a snapshot.
    pub fn from_snapshot(snapshot: HubSnapshot) -> Self {
        let hub = Self::new();
        {
            let mut projects = hub.projects.write();
            for project in snapshot.projects {
                projects.insert(project.project.name.clone(), project);
            }
        }
        hub
    }

    /// Captures the current state.
    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            projects: self.projects.read().values().cloned().collect(),
        }
    }

    /// Adds or replaces a project, keeping existing entities.
    pub fn add_project(&self, project: LocalProject) {
        let mut projects = self.projects.write();
        match projects.get_mut(&project.name) {
            Some(existing) => existing.project = project,
            None => {
                projects.insert(
                    project.name.clone(),
                    ProjectSnapshot {
                        project,
                        entities: Vec::new(),
                    },
                );
            }
        }
    }

    /// Inserts or replaces an entity without validation.
    ///
    /// Returns false if the project does not exist.
    pub fn add_entity(&self, project: &str, entity: LocalEntity) -> bool {
        let mut projects = self.projects.write();
        let Some(state) = projects.get_mut(project) else {
            return false;
        };
        match state.entities.iter_mut().find(|e| e.id == entity.id) {
            Some(slot) => *slot = entity,
            None => state.entities.push(entity),
        }
        true
    }

    /// A project.
    pub fn project(&self, name: &str) -> Option<LocalProject> {
        self.projects.read().get(name).map(|p| p.project.clone())
    }

    /// An entity, with its computed immutability.
    pub fn entity(&self, project: &str, id: &str) -> Option<LocalEntity> {
        let projects = self.projects.read();
        let state = projects.get(project)?;
        let entity = state.entities.iter().find(|e| e.id == id)?;
        Some(with_immutability(entity, &state.entities))
    }

    /// Every entity of a project, parents before children.
    pub fn entities(&self, project: &str) -> Vec<LocalEntity> {
        let projects = self.projects.read();
        match projects.get(project) {
            Some(state) => ordered(&state.entities)
                .into_iter()
                .map(|e| with_immutability(e, &state.entities))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Makes the next commit fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl LocalHub for MemoryHub {
    fn query_project(&self, name: &str) -> SyncResult<Option<LocalProject>> {
        Ok(self.project(name))
    }

    fn query_entities(&self, project: &str) -> SyncResult<Vec<LocalEntity>> {
        Ok(self.entities(project))
    }

    fn get_by_id(&self, project: &str, id: &str) -> SyncResult<Option<LocalEntity>> {
        Ok(self.entity(project, id))
    }

    fn commit(&self, project: &str, changes: &ChangeSet) -> SyncResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Commit("hub rejected the change set".into()));
        }
        let mut projects = self.projects.write();
        let current = projects
            .get(project)
            .ok_or_else(|| SyncError::Commit(format!("project '{project}' does not exist")))?;
        let next = apply(current.clone(), changes)?;
        projects.insert(project.to_string(), next);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn apply(mut state: ProjectSnapshot, changes: &ChangeSet) -> SyncResult<ProjectSnapshot> {
    let patch = &changes.project;
    for (key, value) in &patch.attributes {
        if value.is_null() {
            state.project.attribs.remove(key);
        } else {
            state.project.attribs.insert(key.clone(), value.clone());
        }
    }
    for folder_type in &patch.folder_types {
        if !state.project.folder_types.contains(folder_type) {
            state.project.folder_types.push(folder_type.clone());
        }
    }
    for task_type in &patch.task_types {
        if !state.project.task_types.iter().any(|t| t.eq_ignore_ascii_case(task_type)) {
            state.project.task_types.push(task_type.clone());
        }
    }

    for entity in &changes.created {
        validate_new(&state, entity)?;
        let mut stored = entity.clone();
        stored.immutable = false;
        state.entities.push(stored);
    }

    for update in &changes.updated {
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.id == update.id)
            .ok_or_else(|| SyncError::Commit(format!("entity {} does not exist", update.id)))?;
        if let Some(label) = &update.label {
            entity.label = label.clone();
        }
        for (key, value) in &update.attributes {
            entity.set_attribute(key, value.clone());
        }
    }

    for id in &changes.deleted {
        if !state.entities.iter().any(|e| &e.id == id) {
            return Err(SyncError::Commit(format!("entity {id} does not exist")));
        }
        let doomed = subtree(&state.entities, id);
        state.entities.retain(|e| !doomed.contains(&e.id));
    }
    Ok(state)
}

fn validate_new(state: &ProjectSnapshot, entity: &LocalEntity) -> SyncResult<()> {
    let reject = |reason: String| Err(SyncError::Commit(format!("cannot create {}: {reason}", entity.describe())));

    if state.entities.iter().any(|e| e.id == entity.id) {
        return reject(format!("id {} is taken", entity.id));
    }
    if let Some(parent) = &entity.parent_id {
        if !state.entities.iter().any(|e| &e.id == parent) {
            return reject(format!("parent {parent} does not exist"));
        }
    }
    match entity.kind {
        LocalKind::Folder => {
            let folder_type = entity.folder_type.as_deref().unwrap_or_default();
            if !state.project.folder_types.iter().any(|t| t == folder_type) {
                return reject(format!("folder type '{folder_type}' is not defined"));
            }
        }
        LocalKind::Task => {
            let task_type = entity.task_type.as_deref().unwrap_or_default();
            if !state.project.task_types.iter().any(|t| t.eq_ignore_ascii_case(task_type)) {
                return reject(format!("task type '{task_type}' is not defined"));
            }
        }
        LocalKind::Version => {}
    }
    let key = slug_key(&entity.name);
    let clash = state.entities.iter().any(|e| {
        e.parent_id == entity.parent_id && e.kind == entity.kind && slug_key(&e.name) == key
    });
    if clash {
        return reject(format!("a sibling is already named '{}'", entity.name));
    }
    Ok(())
}

/// Ids of an entity and all of its descendants.
fn subtree(entities: &[LocalEntity], root: &str) -> HashSet<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in entities {
        if let Some(parent) = &e.parent_id {
            children.entry(parent.as_str()).or_default().push(e.id.as_str());
        }
    }
    let mut found = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if found.insert(id.to_string()) {
            stack.extend(children.get(id).into_iter().flatten().copied());
        }
    }
    found
}

/// Entities ordered parents before children, siblings in insertion order.
fn ordered(entities: &[LocalEntity]) -> Vec<&LocalEntity> {
    let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut children: HashMap<Option<&str>, Vec<&LocalEntity>> = HashMap::new();
    for e in entities {
        let parent = e.parent_id.as_deref().filter(|p| ids.contains(p));
        children.entry(parent).or_default().push(e);
    }
    let mut out = Vec::with_capacity(entities.len());
    let mut level: Vec<&LocalEntity> = children.remove(&None).unwrap_or_default();
    while !level.is_empty() {
        let mut next = Vec::new();
        for e in level {
            next.extend(children.remove(&Some(e.id.as_str())).unwrap_or_default());
            out.push(e);
        }
        level = next;
    }
    out
}

/// Entities holding published versions cannot move or disappear.
fn with_immutability(entity: &LocalEntity, all: &[LocalEntity]) -> LocalEntity {
    let mut entity = entity.clone();
    if !entity.immutable && entity.kind != LocalKind::Version {
        entity.immutable = subtree(all, &entity.id)
            .into_iter()
            .filter_map(|id| all.iter().find(|e| e.id == id))
            .any(|e| e.kind == LocalKind::Version);
    }
    entity
}
