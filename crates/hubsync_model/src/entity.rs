//! The normalized entity exchanged between the two systems.

use crate::error::{ModelError, ModelResult};
use crate::fields::REMOVED;
use crate::remote::{RemoteRef, RemoteType};
use crate::slug::slug_key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attribute bag, ordered by attribute name.
pub type Attributes = BTreeMap<String, Value>;

/// Structural kind of a [`SyncEntity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Hierarchy folder (episode, sequence, shot, asset...).
    Folder,
    /// Task leaf.
    Task,
    /// Project root.
    Project,
    /// Reviewable version.
    Version,
    /// Synthesized folder grouping records by a discriminator value.
    GroupingNode,
}

/// Outcome marker of the last reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Both sides agree.
    Synced,
    /// The last attempt failed.
    Failed,
    /// Deliberately left alone.
    Skipped,
}

impl SyncStatus {
    /// Value stored in the remote status field.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "Synced",
            SyncStatus::Failed => "Failed",
            SyncStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s {
            "Synced" => Ok(SyncStatus::Synced),
            "Failed" => Ok(SyncStatus::Failed),
            "Skipped" => Ok(SyncStatus::Skipped),
            other => Err(ModelError::unsupported("sync status", other)),
        }
    }
}

/// Parent of a [`SyncEntity`], by whichever identifier is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    /// Directly under the project root.
    Project,
    /// Local entity id.
    Local(String),
    /// Remote record.
    Remote(RemoteRef),
    /// Grouping node, by slug.
    Grouping(String),
}

/// Normalized, system-agnostic entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntity {
    /// Structural kind.
    pub kind: EntityKind,
    /// Remote type. For a grouping node, the type of the records it groups.
    pub remote_type: Option<RemoteType>,
    /// Local id, empty while the entity only exists remotely.
    pub local_id: Option<String>,
    /// Remote id, empty while the entity only exists locally.
    pub remote_id: Option<i64>,
    /// Slug-safe identifier, stable across renames.
    pub name: String,
    /// Display value.
    pub label: String,
    /// Task classification (pipeline step), tasks only.
    pub task_type: Option<String>,
    /// Parent reference; `None` only for the project itself.
    pub parent: Option<ParentRef>,
    /// Built-in and mapped custom attributes.
    pub attributes: Attributes,
    /// Status of the last reconciliation.
    pub sync_status: SyncStatus,
}

impl SyncEntity {
    /// Creates an unlinked entity.
    pub fn new(kind: EntityKind, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            remote_type: None,
            local_id: None,
            remote_id: None,
            name: name.into(),
            label: label.into(),
            task_type: None,
            parent: None,
            attributes: Attributes::new(),
            sync_status: SyncStatus::Failed,
        }
    }

    /// Derives the grouping node for a discriminator value.
    ///
    /// The same value, in any case, always yields the same node name.
    pub fn grouping(discriminator: &str, grouped: RemoteType) -> Self {
        let mut node = Self::new(EntityKind::GroupingNode, slug_key(discriminator), discriminator.trim());
        node.remote_type = Some(grouped);
        node.parent = Some(ParentRef::Project);
        node.sync_status = SyncStatus::Synced;
        node
    }

    /// Builder-style remote type setter.
    pub fn with_remote_type(mut self, remote_type: RemoteType) -> Self {
        self.remote_type = Some(remote_type);
        self
    }

    /// Reference to the remote counterpart, if linked.
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        match (self.remote_type, self.remote_id) {
            (Some(kind), Some(id)) if self.kind != EntityKind::GroupingNode => {
                Some(RemoteRef::new(kind, id))
            }
            _ => None,
        }
    }

    /// Records the remote id.
    ///
    /// Linking to the same id again is a no-op; linking to another id is refused.
    pub fn link_remote(&mut self, id: i64) -> ModelResult<()> {
        if self.kind == EntityKind::GroupingNode {
            return Err(ModelError::GroupingNodeRemote {
                name: self.name.clone(),
            });
        }
        match self.remote_id {
            Some(current) if current != id => Err(ModelError::Relink {
                entity: self.describe(),
                current: current.to_string(),
                attempted: id.to_string(),
            }),
            _ => {
                self.remote_id = Some(id);
                Ok(())
            }
        }
    }

    /// Records the local id, with the same rules as [`link_remote`](Self::link_remote).
    pub fn link_local(&mut self, id: &str) -> ModelResult<()> {
        match self.local_id.as_deref() {
            Some(current) if current != id => Err(ModelError::Relink {
                entity: self.describe(),
                current: current.to_string(),
                attempted: id.to_string(),
            }),
            _ => {
                self.local_id = Some(id.to_string());
                Ok(())
            }
        }
    }

    /// True when both identifiers are known.
    pub fn is_linked(&self) -> bool {
        self.local_id.is_some() && self.remote_id.is_some()
    }

    /// True when the cross-reference carries the removed sentinel.
    pub fn is_removed(&self) -> bool {
        self.local_id.as_deref() == Some(REMOVED)
    }

    /// Short human-readable identification for logs and reports.
    pub fn describe(&self) -> String {
        match (self.remote_type, self.remote_id) {
            (Some(kind), Some(id)) => format!("{kind} '{}' (#{id})", self.label),
            (Some(kind), None) => format!("{kind} '{}'", self.label),
            _ => format!("{:?} '{}'", self.kind, self.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_node_is_case_normalized() {
        let a = SyncEntity::grouping("Character", RemoteType::Asset);
        let b = SyncEntity::grouping(" character", RemoteType::Asset);
        assert_eq!(a.name, "character");
        assert_eq!(a.name, b.name);
        assert_eq!(a.label, "Character");
        assert_eq!(a.parent, Some(ParentRef::Project));
    }

    #[test]
    fn grouping_node_refuses_remote_id() {
        let mut node = SyncEntity::grouping("prop", RemoteType::Asset);
        assert!(matches!(
            node.link_remote(5),
            Err(ModelError::GroupingNodeRemote { .. })
        ));
        assert_eq!(node.remote_ref(), None);
    }

    #[test]
    fn relinking_to_another_counterpart_fails() {
        let mut entity =
            SyncEntity::new(EntityKind::Folder, "sh010", "sh010").with_remote_type(RemoteType::Shot);
        entity.link_remote(10).unwrap();
        entity.link_remote(10).unwrap();
        assert!(matches!(
            entity.link_remote(11),
            Err(ModelError::Relink { .. })
        ));
        assert_eq!(entity.remote_id, Some(10));

        entity.link_local("abc").unwrap();
        assert!(entity.link_local("def").is_err());
        assert!(entity.is_linked());
    }

    #[test]
    fn sync_status_parses() {
        assert_eq!("Skipped".parse::<SyncStatus>().unwrap(), SyncStatus::Skipped);
        assert!("synced".parse::<SyncStatus>().is_err());
    }
}
