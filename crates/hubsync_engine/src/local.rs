//! Local hierarchy entities and the buffered working set of one run.

use crate::client::LocalHub;
use crate::config::{ASSIGNEES_ATTRIB, STATUS_ATTRIB, TAGS_ATTRIB};
use crate::error::{SyncError, SyncResult};
use hubsync_model::fields::{GROUPING_TYPE, PUSH_ATTRIB, REMOTE_ID_ATTRIB, REMOTE_TYPE_ATTRIB, REMOVED};
use hubsync_model::{
    same_slug, Attributes, EntityKind, ParentRef, RemoteRef, RemoteType, SyncEntity, SyncStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Local entity families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalKind {
    /// Folder.
    Folder,
    /// Task.
    Task,
    /// Version.
    Version,
}

/// An entity of the local hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Entity id.
    pub id: String,
    /// Entity family.
    pub kind: LocalKind,
    /// Parent id; `None` for entities directly under the project.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Slug-safe name.
    pub name: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Folder type, folders only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_type: Option<String>,
    /// Task type, tasks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Status name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Tag names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Assignee logins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Custom attributes, cross-reference attributes included.
    #[serde(default)]
    pub attribs: Attributes,
    /// Other entities depend on this entity's position in the hierarchy.
    #[serde(default)]
    pub immutable: bool,
}

impl LocalEntity {
    fn blank(kind: LocalKind, id: String, parent_id: Option<String>, name: &str, label: &str) -> Self {
        Self {
            id,
            kind,
            parent_id,
            name: name.to_string(),
            label: if label.is_empty() { name.to_string() } else { label.to_string() },
            folder_type: None,
            task_type: None,
            status: None,
            tags: Vec::new(),
            assignees: Vec::new(),
            attribs: Attributes::new(),
            immutable: false,
        }
    }

    /// Creates a folder.
    pub fn folder(id: impl Into<String>, parent_id: Option<&str>, folder_type: &str, name: &str) -> Self {
        let mut entity = Self::blank(LocalKind::Folder, id.into(), parent_id.map(str::to_string), name, name);
        entity.folder_type = Some(folder_type.to_string());
        entity
    }

    /// Creates a task.
    pub fn task(id: impl Into<String>, parent_id: Option<&str>, task_type: &str, name: &str) -> Self {
        let mut entity = Self::blank(LocalKind::Task, id.into(), parent_id.map(str::to_string), name, name);
        entity.task_type = Some(task_type.to_string());
        entity
    }

    /// Creates a version.
    pub fn version(id: impl Into<String>, parent_id: &str, name: &str) -> Self {
        Self::blank(LocalKind::Version, id.into(), Some(parent_id.to_string()), name, name)
    }

    /// Builder-style label setter.
    ///
    /// An empty label keeps the name as label.
    pub fn with_label(mut self, label: &str) -> Self {
        if !label.is_empty() {
            self.label = label.to_string();
        }
        self
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(key, value.into());
        self
    }

    /// Remote counterpart recorded on the entity.
    ///
    /// `None` when unlinked or marked removed.
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        remote_ref_from(&self.attribs)
    }

    /// True when the cross-reference carries the removed sentinel.
    pub fn is_removed(&self) -> bool {
        self.attribs.get(REMOTE_ID_ATTRIB).and_then(Value::as_str) == Some(REMOVED)
    }

    /// True for folders synthesized to group remote records by a discriminator.
    pub fn is_grouping(&self) -> bool {
        self.kind == LocalKind::Folder
            && self.attribs.get(REMOTE_TYPE_ATTRIB).and_then(Value::as_str) == Some(GROUPING_TYPE)
    }

    /// Remote type this entity maps to, if any.
    ///
    /// Grouping folders and folders of a type unknown to the remote side map to nothing.
    pub fn remote_type(&self) -> Option<RemoteType> {
        match self.kind {
            LocalKind::Folder if self.is_grouping() => None,
            LocalKind::Folder => self
                .folder_type
                .as_deref()
                .and_then(|t| t.parse::<RemoteType>().ok())
                .filter(|t| t.is_folder()),
            LocalKind::Task => Some(RemoteType::Task),
            LocalKind::Version => Some(RemoteType::Version),
        }
    }

    /// Reads an attribute, built-in fields included.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            STATUS_ATTRIB => self.status.clone().map(Value::String),
            TAGS_ATTRIB => Some(string_list(&self.tags)),
            ASSIGNEES_ATTRIB => Some(string_list(&self.assignees)),
            _ => self.attribs.get(key).cloned(),
        }
    }

    /// Writes an attribute, routing built-in keys to their fields.
    ///
    /// Returns true if the stored value changed. Values of the wrong shape for a
    /// built-in field are ignored.
    pub fn set_attribute(&mut self, key: &str, value: Value) -> bool {
        match key {
            STATUS_ATTRIB => {
                let status = match value {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    _ => return false,
                };
                replace_if_changed(&mut self.status, status)
            }
            TAGS_ATTRIB => match strings_of(&value) {
                Some(tags) => replace_if_changed(&mut self.tags, tags),
                None => false,
            },
            ASSIGNEES_ATTRIB => match strings_of(&value) {
                Some(users) => replace_if_changed(&mut self.assignees, users),
                None => false,
            },
            _ => {
                if value.is_null() {
                    return self.attribs.remove(key).is_some();
                }
                if self.attribs.get(key) == Some(&value) {
                    return false;
                }
                self.attribs.insert(key.to_string(), value);
                true
            }
        }
    }

    /// Attribute bag as sent to the attribute mapper.
    ///
    /// Empty built-in values are left out.
    pub fn sync_attributes(&self) -> Attributes {
        let mut attrs = self.attribs.clone();
        attrs.remove(REMOTE_ID_ATTRIB);
        attrs.remove(REMOTE_TYPE_ATTRIB);
        if let Some(status) = &self.status {
            attrs.insert(STATUS_ATTRIB.to_string(), Value::String(status.clone()));
        }
        if !self.tags.is_empty() {
            attrs.insert(TAGS_ATTRIB.to_string(), string_list(&self.tags));
        }
        if !self.assignees.is_empty() {
            attrs.insert(ASSIGNEES_ATTRIB.to_string(), string_list(&self.assignees));
        }
        attrs
    }

    /// Normalized view of this entity.
    pub fn to_sync_entity(&self) -> SyncEntity {
        let kind = match self.kind {
            LocalKind::Folder if self.is_grouping() => EntityKind::GroupingNode,
            LocalKind::Folder => EntityKind::Folder,
            LocalKind::Task => EntityKind::Task,
            LocalKind::Version => EntityKind::Version,
        };
        let mut entity = SyncEntity::new(kind, self.name.clone(), self.label.clone());
        entity.remote_type = if kind == EntityKind::GroupingNode {
            Some(RemoteType::Asset)
        } else {
            self.remote_type()
        };
        entity.local_id = Some(self.id.clone());
        entity.remote_id = self.remote_ref().map(|r| r.id);
        entity.task_type = self.task_type.clone();
        entity.parent = Some(match &self.parent_id {
            Some(id) => ParentRef::Local(id.clone()),
            None => ParentRef::Project,
        });
        entity.attributes = self.sync_attributes();
        entity.sync_status = if self.is_removed() {
            SyncStatus::Skipped
        } else if entity.remote_id.is_some() || kind == EntityKind::GroupingNode {
            SyncStatus::Synced
        } else {
            SyncStatus::Failed
        };
        entity
    }

    /// Short description for logs and reports.
    pub fn describe(&self) -> String {
        let family = match self.kind {
            LocalKind::Folder => self.folder_type.as_deref().unwrap_or("Folder"),
            LocalKind::Task => "Task",
            LocalKind::Version => "Version",
        };
        format!("{family} '{}'", self.label)
    }
}

/// A status defined on the local project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    /// Display name, e.g. `Final`.
    pub name: String,
    /// Short code, e.g. `fin`.
    pub short_name: String,
}

impl ProjectStatus {
    /// Creates a status.
    pub fn new(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: short_name.into(),
        }
    }
}

/// A local project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalProject {
    /// Project name.
    pub name: String,
    /// Project code.
    #[serde(default)]
    pub code: String,
    /// Project attributes, cross-reference attributes included.
    #[serde(default)]
    pub attribs: Attributes,
    /// Allowed folder types.
    #[serde(default)]
    pub folder_types: Vec<String>,
    /// Allowed task types.
    #[serde(default)]
    pub task_types: Vec<String>,
    /// Status vocabulary.
    #[serde(default)]
    pub statuses: Vec<ProjectStatus>,
}

impl LocalProject {
    /// Creates an empty project.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: name.clone(),
            name,
            attribs: Attributes::new(),
            folder_types: Vec::new(),
            task_types: Vec::new(),
            statuses: Vec::new(),
        }
    }

    /// Remote project recorded on the local project.
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        remote_ref_from(&self.attribs).filter(|r| r.kind == RemoteType::Project)
    }

    /// Whether local changes are pushed as they happen.
    pub fn push_enabled(&self) -> bool {
        self.attribs
            .get(PUSH_ATTRIB)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Mutation of an existing entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    /// Entity id.
    pub id: String,
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Attributes to set; `null` removes a custom attribute.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Mutation of the project itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    /// Attributes to set.
    #[serde(default)]
    pub attributes: Attributes,
    /// Folder types to add.
    #[serde(default)]
    pub folder_types: Vec<String>,
    /// Task types to add.
    #[serde(default)]
    pub task_types: Vec<String>,
}

impl ProjectPatch {
    /// True when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.folder_types.is_empty() && self.task_types.is_empty()
    }
}

/// All local mutations of one pass or notification, applied atomically.
///
/// Creations are ordered parent before child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Entities to create.
    pub created: Vec<LocalEntity>,
    /// Entities to update.
    pub updated: Vec<EntityPatch>,
    /// Entities to delete, with their descendants.
    pub deleted: Vec<String>,
    /// Project changes.
    pub project: ProjectPatch,
}

impl ChangeSet {
    /// True when the change set is empty.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.project.is_empty()
    }

    /// Number of entity-level operations, plus one for a project change.
    pub fn len(&self) -> usize {
        self.created.len()
            + self.updated.len()
            + self.deleted.len()
            + usize::from(!self.project.is_empty())
    }
}

/// Working set of the local hierarchy for one run.
///
/// Reads see buffered mutations immediately; nothing reaches the hub until
/// [`commit`](Self::commit).
#[derive(Debug)]
pub struct LocalTree {
    project: LocalProject,
    entities: HashMap<String, LocalEntity>,
    children: HashMap<Option<String>, Vec<String>>,
    created: Vec<String>,
    created_set: HashSet<String>,
    patches: BTreeMap<String, EntityPatch>,
    deleted: Vec<String>,
    project_patch: ProjectPatch,
}

impl LocalTree {
    /// Loads a project and all of its entities.
    pub fn load<L: LocalHub + ?Sized>(hub: &L, project: &str) -> SyncResult<Self> {
        let project_data = hub
            .query_project(project)?
            .ok_or_else(|| SyncError::precondition(format!("local project '{project}' does not exist")))?;
        let entities = hub.query_entities(project)?;
        Ok(Self::from_parts(project_data, entities))
    }

    /// Builds a working set from already-fetched data.
    pub fn from_parts(project: LocalProject, entities: Vec<LocalEntity>) -> Self {
        let mut tree = Self {
            project,
            entities: HashMap::new(),
            children: HashMap::new(),
            created: Vec::new(),
            created_set: HashSet::new(),
            patches: BTreeMap::new(),
            deleted: Vec::new(),
            project_patch: ProjectPatch::default(),
        };
        for entity in entities {
            tree.insert(entity);
        }
        tree
    }

    fn insert(&mut self, entity: LocalEntity) {
        self.children
            .entry(entity.parent_id.clone())
            .or_default()
            .push(entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    /// The project.
    pub fn project(&self) -> &LocalProject {
        &self.project
    }

    /// Entity by id, if loaded.
    pub fn get(&self, id: &str) -> Option<&LocalEntity> {
        self.entities.get(id)
    }

    /// Entity by id, falling back to a hub query for entities not loaded yet.
    pub fn get_or_query<L: LocalHub + ?Sized>(&mut self, hub: &L, id: &str) -> SyncResult<Option<LocalEntity>> {
        if !self.entities.contains_key(id) && !self.deleted.iter().any(|d| d == id) {
            if let Some(entity) = hub.get_by_id(&self.project.name, id)? {
                self.insert(entity);
            }
        }
        Ok(self.entities.get(id).cloned())
    }

    /// Children of `parent` (`None` = project root), in load then creation order.
    pub fn children(&self, parent: Option<&str>) -> Vec<&LocalEntity> {
        self.children
            .get(&parent.map(str::to_string))
            .map(|ids| ids.iter().filter_map(|id| self.entities.get(id)).collect())
            .unwrap_or_default()
    }

    /// All loaded entities.
    pub fn entities(&self) -> impl Iterator<Item = &LocalEntity> {
        self.entities.values()
    }

    /// Finds a child by slug, preferring entities that existed before this run.
    pub fn find_child<F>(&self, parent: Option<&str>, kind: LocalKind, name: &str, accept: F) -> Option<&LocalEntity>
    where
        F: Fn(&LocalEntity) -> bool,
    {
        let mut candidates = self
            .children(parent)
            .into_iter()
            .filter(|e| e.kind == kind && same_slug(&e.name, name) && accept(e));
        let first = candidates.next()?;
        if !self.was_created(&first.id) {
            return Some(first);
        }
        candidates.find(|e| !self.was_created(&e.id)).or(Some(first))
    }

    /// True if the entity was created during this run.
    pub fn was_created(&self, id: &str) -> bool {
        self.created_set.contains(id)
    }

    fn stage_create(&mut self, entity: LocalEntity) -> String {
        let id = entity.id.clone();
        self.created.push(id.clone());
        self.created_set.insert(id.clone());
        self.insert(entity);
        id
    }

    fn new_id(reuse: Option<String>) -> String {
        reuse.unwrap_or_else(|| Uuid::new_v4().simple().to_string())
    }

    /// Buffers a new folder and returns its id.
    pub fn add_folder(&mut self, parent: Option<&str>, folder_type: &str, name: &str, label: &str, id: Option<String>) -> String {
        let entity = LocalEntity::folder(Self::new_id(id), parent, folder_type, name).with_label(label);
        self.stage_create(entity)
    }

    /// Buffers a new task and returns its id.
    pub fn add_task(&mut self, parent: Option<&str>, task_type: &str, name: &str, label: &str, id: Option<String>) -> String {
        let entity = LocalEntity::task(Self::new_id(id), parent, task_type, name).with_label(label);
        self.stage_create(entity)
    }

    /// Buffers a new version and returns its id.
    pub fn add_version(&mut self, parent: &str, name: &str, label: &str, id: Option<String>) -> String {
        let entity = LocalEntity::version(Self::new_id(id), parent, name).with_label(label);
        self.stage_create(entity)
    }

    /// Changes an entity label. Returns true if it changed.
    pub fn set_label(&mut self, id: &str, label: &str) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.label == label {
            return false;
        }
        entity.label = label.to_string();
        if !self.created_set.contains(id) {
            self.patch(id).label = Some(label.to_string());
        }
        true
    }

    /// Sets an attribute. Returns true if it changed.
    pub fn set_attribute(&mut self, id: &str, key: &str, value: Value) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if !entity.set_attribute(key, value.clone()) {
            return false;
        }
        if !self.created_set.contains(id) {
            self.patch(id).attributes.insert(key.to_string(), value);
        }
        true
    }

    fn patch(&mut self, id: &str) -> &mut EntityPatch {
        self.patches
            .entry(id.to_string())
            .or_insert_with(|| EntityPatch {
                id: id.to_string(),
                ..EntityPatch::default()
            })
    }

    /// Deletes an entity and its descendants. Returns false if unknown.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(entity) = self.entities.get(id) else {
            return false;
        };
        let parent = entity.parent_id.clone();
        let was_new = self.was_created(id);
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|s| s != id);
        }

        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(&Some(current.clone())) {
                stack.extend(kids);
            }
            self.entities.remove(&current);
            self.patches.remove(&current);
            if self.created_set.remove(&current) {
                self.created.retain(|c| c != &current);
            }
        }

        if !was_new {
            self.deleted.push(id.to_string());
        }
        true
    }

    /// Sets a project attribute. Returns true if it changed.
    pub fn set_project_attribute(&mut self, key: &str, value: Value) -> bool {
        if self.project.attribs.get(key) == Some(&value) {
            return false;
        }
        self.project.attribs.insert(key.to_string(), value.clone());
        self.project_patch.attributes.insert(key.to_string(), value);
        true
    }

    /// Adds a folder type to the project if missing.
    pub fn ensure_folder_type(&mut self, name: &str) {
        if !self.project.folder_types.iter().any(|t| t == name) {
            self.project.folder_types.push(name.to_string());
            self.project_patch.folder_types.push(name.to_string());
        }
    }

    /// Adds a task type to the project if missing.
    pub fn ensure_task_type(&mut self, name: &str) {
        if !self.project.task_types.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            self.project.task_types.push(name.to_string());
            self.project_patch.task_types.push(name.to_string());
        }
    }

    /// Buffered mutations, without clearing them.
    pub fn pending(&self) -> ChangeSet {
        ChangeSet {
            created: self
                .created
                .iter()
                .filter_map(|id| self.entities.get(id).cloned())
                .collect(),
            updated: self.patches.values().cloned().collect(),
            deleted: self.deleted.clone(),
            project: self.project_patch.clone(),
        }
    }

    /// Commits all buffered mutations in one call. Returns the number applied.
    pub fn commit<L: LocalHub + ?Sized>(&mut self, hub: &L) -> SyncResult<usize> {
        let changes = self.pending();
        if changes.is_empty() {
            return Ok(0);
        }
        hub.commit(&self.project.name, &changes)?;

        self.created.clear();
        self.created_set.clear();
        self.patches.clear();
        self.deleted.clear();
        self.project_patch = ProjectPatch::default();
        Ok(changes.len())
    }
}

/// Encodes a remote id the way local attributes store it.
pub fn remote_id_value(id: i64) -> Value {
    Value::String(id.to_string())
}

fn remote_ref_from(attribs: &Attributes) -> Option<RemoteRef> {
    let id = match attribs.get(REMOTE_ID_ATTRIB)? {
        Value::String(s) => s.parse().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    let kind = attribs.get(REMOTE_TYPE_ATTRIB)?.as_str()?.parse().ok()?;
    Some(RemoteRef::new(kind, id))
}

fn string_list(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn strings_of(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Value::Null => Some(Vec::new()),
        _ => None,
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
