//! Change notifications delivered by either system.
//!
//! Notifications arrive as `(topic, payload)` pairs and are parsed into closed
//! enums up front, so dispatch is an exhaustive `match` rather than string
//! branching.

use crate::error::{ModelError, ModelResult};
use crate::fields::{REMOTE_ID_ATTRIB, REMOTE_TYPE_ATTRIB};
use crate::remote::{RemoteRef, RemoteType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Topic carried by every remote-side notification.
pub const REMOTE_TOPIC: &str = "remote.event";

/// Local entity families that emit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalEntityType {
    /// Folder.
    Folder,
    /// Task.
    Task,
    /// Version.
    Version,
}

/// What happened to a local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalAction {
    /// Entity created.
    Created,
    /// Entity deleted.
    Deleted,
    /// Name changed.
    Renamed,
    /// Label changed.
    LabelChanged,
    /// Custom attributes changed.
    AttribChanged,
    /// Status changed.
    StatusChanged,
    /// Tags changed.
    TagsChanged,
    /// Assignees changed (tasks).
    AssigneesChanged,
}

/// Parsed local topic, e.g. `entity.task.created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalTopic {
    /// Entity family.
    pub entity: LocalEntityType,
    /// Action.
    pub action: LocalAction,
}

impl LocalTopic {
    /// Parses `entity.<family>.<action>`.
    pub fn parse(topic: &str) -> ModelResult<Self> {
        let mut parts = topic.split('.');
        let (Some("entity"), Some(family), Some(action), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ModelError::unsupported("topic", topic));
        };

        let entity = match family {
            "folder" => LocalEntityType::Folder,
            "task" => LocalEntityType::Task,
            "version" => LocalEntityType::Version,
            _ => return Err(ModelError::unsupported("topic", topic)),
        };
        let action = match action {
            "created" => LocalAction::Created,
            "deleted" => LocalAction::Deleted,
            "renamed" => LocalAction::Renamed,
            "label_changed" => LocalAction::LabelChanged,
            "attrib_changed" => LocalAction::AttribChanged,
            "status_changed" => LocalAction::StatusChanged,
            "tags_changed" => LocalAction::TagsChanged,
            "assignees_changed" => LocalAction::AssigneesChanged,
            _ => return Err(ModelError::unsupported("topic", topic)),
        };

        Ok(Self { entity, action })
    }
}

impl fmt::Display for LocalTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.entity {
            LocalEntityType::Folder => "folder",
            LocalEntityType::Task => "task",
            LocalEntityType::Version => "version",
        };
        let action = match self.action {
            LocalAction::Created => "created",
            LocalAction::Deleted => "deleted",
            LocalAction::Renamed => "renamed",
            LocalAction::LabelChanged => "label_changed",
            LocalAction::AttribChanged => "attrib_changed",
            LocalAction::StatusChanged => "status_changed",
            LocalAction::TagsChanged => "tags_changed",
            LocalAction::AssigneesChanged => "assignees_changed",
        };
        write!(f, "entity.{family}.{action}")
    }
}

/// A change on the local side.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChange {
    /// Parsed topic.
    pub topic: LocalTopic,
    /// Project name.
    pub project: String,
    /// Id of the changed entity.
    pub entity_id: String,
    /// Previous value, for change events.
    pub old_value: Value,
    /// New value, for change events.
    pub new_value: Value,
    /// Remote counterpart recorded on the entity before it changed.
    ///
    /// Deletion events carry it because the entity can no longer be queried.
    pub remote: Option<RemoteRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalPayload {
    project: String,
    entity_id: String,
    #[serde(default)]
    old_value: Value,
    #[serde(default)]
    new_value: Value,
    #[serde(default)]
    entity_data: Value,
}

/// Remote event categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteEventKind {
    /// Record created.
    NewEntity,
    /// Retired record restored.
    Revival,
    /// A single field changed.
    AttributeChange {
        /// Field name.
        attribute: String,
    },
    /// Record retired.
    Retirement,
}

/// A change on the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    /// Event category.
    pub kind: RemoteEventKind,
    /// Changed record.
    pub entity: RemoteRef,
    /// Owning remote project id.
    pub project_id: i64,
    /// Previous field value.
    pub old_value: Value,
    /// New field value.
    pub new_value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePayload {
    #[serde(rename = "type")]
    event_type: String,
    entity_type: String,
    entity_id: i64,
    project_id: i64,
    #[serde(default)]
    attribute_name: Option<String>,
    #[serde(default)]
    old_value: Value,
    #[serde(default)]
    new_value: Value,
}

/// A single change notification from either system.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Emitted by the local hierarchy.
    Local(LocalChange),
    /// Emitted by the remote tracking service.
    Remote(RemoteChange),
}

/// Wire form of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic string.
    pub topic: String,
    /// Topic-specific payload.
    pub payload: Value,
}

impl Notification {
    /// Parses a `(topic, payload)` pair.
    pub fn from_topic(topic: &str, payload: Value) -> ModelResult<Self> {
        if topic == REMOTE_TOPIC {
            return parse_remote(payload).map(Notification::Remote);
        }
        let topic = LocalTopic::parse(topic)?;
        let payload: LocalPayload = serde_json::from_value(payload).map_err(|e| {
            ModelError::InvalidValue {
                field: "payload".into(),
                reason: e.to_string(),
            }
        })?;
        let remote = remote_ref_from_entity_data(&payload.entity_data);
        Ok(Notification::Local(LocalChange {
            topic,
            project: payload.project,
            entity_id: payload.entity_id,
            old_value: payload.old_value,
            new_value: payload.new_value,
            remote,
        }))
    }

    /// Short description for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Notification::Local(change) => {
                format!("{} {} in '{}'", change.topic, change.entity_id, change.project)
            }
            Notification::Remote(change) => format!(
                "{:?} {} in project #{}",
                change.kind, change.entity, change.project_id
            ),
        }
    }
}

impl TryFrom<Envelope> for Notification {
    type Error = ModelError;

    fn try_from(envelope: Envelope) -> ModelResult<Self> {
        Notification::from_topic(&envelope.topic, envelope.payload)
    }
}

fn parse_remote(payload: Value) -> ModelResult<RemoteChange> {
    let payload: RemotePayload =
        serde_json::from_value(payload).map_err(|e| ModelError::InvalidValue {
            field: "payload".into(),
            reason: e.to_string(),
        })?;

    let kind = match payload.event_type.as_str() {
        "new_entity" => RemoteEventKind::NewEntity,
        "entity_revival" => RemoteEventKind::Revival,
        "entity_retirement" => RemoteEventKind::Retirement,
        "attribute_change" => RemoteEventKind::AttributeChange {
            attribute: payload
                .attribute_name
                .ok_or_else(|| ModelError::missing("attribute_change event", "attributeName"))?,
        },
        other => return Err(ModelError::unsupported("remote event", other)),
    };
    let entity_type: RemoteType = payload.entity_type.parse()?;

    Ok(RemoteChange {
        kind,
        entity: RemoteRef::new(entity_type, payload.entity_id),
        project_id: payload.project_id,
        old_value: payload.old_value,
        new_value: payload.new_value,
    })
}

fn remote_ref_from_entity_data(data: &Value) -> Option<RemoteRef> {
    let attrib = data.get("attrib")?;
    let kind: RemoteType = attrib.get(REMOTE_TYPE_ATTRIB)?.as_str()?.parse().ok()?;
    let id = match attrib.get(REMOTE_ID_ATTRIB)? {
        Value::String(s) => s.parse().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Some(RemoteRef::new(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_local_topics() {
        let topic = LocalTopic::parse("entity.task.label_changed").unwrap();
        assert_eq!(topic.entity, LocalEntityType::Task);
        assert_eq!(topic.action, LocalAction::LabelChanged);
        assert_eq!(topic.to_string(), "entity.task.label_changed");

        for bad in ["entity.product.created", "entity.task", "thumbnail.created", "entity.task.created.x"] {
            assert!(matches!(
                LocalTopic::parse(bad),
                Err(ModelError::UnsupportedVariant { .. })
            ));
        }
    }

    #[test]
    fn deletion_carries_remote_reference() {
        let n = Notification::from_topic(
            "entity.folder.deleted",
            json!({
                "project": "demo",
                "entityId": "f1",
                "entityData": {"attrib": {"remoteId": "42", "remoteType": "Shot"}}
            }),
        )
        .unwrap();
        let Notification::Local(change) = n else {
            panic!("expected local change");
        };
        assert_eq!(change.remote, Some(RemoteRef::new(RemoteType::Shot, 42)));
    }

    #[test]
    fn parses_remote_attribute_change() {
        let n = Notification::try_from(Envelope {
            topic: REMOTE_TOPIC.into(),
            payload: json!({
                "type": "attribute_change",
                "entityType": "Shot",
                "entityId": 7,
                "projectId": 1,
                "attributeName": "code",
                "oldValue": "sh010",
                "newValue": "sh010_alt"
            }),
        })
        .unwrap();
        let Notification::Remote(change) = n else {
            panic!("expected remote change");
        };
        assert_eq!(
            change.kind,
            RemoteEventKind::AttributeChange {
                attribute: "code".into()
            }
        );
        assert_eq!(change.new_value, json!("sh010_alt"));
    }

    #[test]
    fn rejects_unknown_remote_event() {
        let err = Notification::from_topic(
            REMOTE_TOPIC,
            json!({"type": "entity_merge", "entityType": "Shot", "entityId": 1, "projectId": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedVariant { .. }));
    }

    #[test]
    fn attribute_change_requires_attribute_name() {
        let err = Notification::from_topic(
            REMOTE_TOPIC,
            json!({"type": "attribute_change", "entityType": "Shot", "entityId": 1, "projectId": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::MissingField { .. }));
    }
}
