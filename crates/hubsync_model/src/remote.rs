//! Remote-side records, references and schema descriptions.

use crate::entity::EntityKind;
use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Field values of a remote record, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// Remote entity types the engine knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RemoteType {
    /// Project root.
    Project,
    /// Episode folder.
    Episode,
    /// Sequence folder.
    Sequence,
    /// Scene folder.
    Scene,
    /// Shot folder.
    Shot,
    /// Asset folder.
    Asset,
    /// Task leaf.
    Task,
    /// Reviewable version.
    Version,
    /// Pipeline step (task classification).
    Step,
    /// Tag vocabulary entry.
    Tag,
    /// User account.
    HumanUser,
}

impl RemoteType {
    /// Types that become folders on the local side.
    pub const FOLDERS: [RemoteType; 5] = [
        RemoteType::Episode,
        RemoteType::Sequence,
        RemoteType::Scene,
        RemoteType::Shot,
        RemoteType::Asset,
    ];

    /// Returns the remote type name.
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteType::Project => "Project",
            RemoteType::Episode => "Episode",
            RemoteType::Sequence => "Sequence",
            RemoteType::Scene => "Scene",
            RemoteType::Shot => "Shot",
            RemoteType::Asset => "Asset",
            RemoteType::Task => "Task",
            RemoteType::Version => "Version",
            RemoteType::Step => "Step",
            RemoteType::Tag => "Tag",
            RemoteType::HumanUser => "HumanUser",
        }
    }

    /// Local entity kind for hierarchy types, `None` for lookup types.
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            RemoteType::Project => Some(EntityKind::Project),
            RemoteType::Episode
            | RemoteType::Sequence
            | RemoteType::Scene
            | RemoteType::Shot
            | RemoteType::Asset => Some(EntityKind::Folder),
            RemoteType::Task => Some(EntityKind::Task),
            RemoteType::Version => Some(EntityKind::Version),
            RemoteType::Step | RemoteType::Tag | RemoteType::HumanUser => None,
        }
    }

    /// Returns true for types mirrored as local folders.
    pub fn is_folder(self) -> bool {
        self.entity_kind() == Some(EntityKind::Folder)
    }
}

impl fmt::Display for RemoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteType {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s {
            "Project" => Ok(RemoteType::Project),
            "Episode" => Ok(RemoteType::Episode),
            "Sequence" => Ok(RemoteType::Sequence),
            "Scene" => Ok(RemoteType::Scene),
            "Shot" => Ok(RemoteType::Shot),
            "Asset" => Ok(RemoteType::Asset),
            "Task" => Ok(RemoteType::Task),
            "Version" => Ok(RemoteType::Version),
            "Step" => Ok(RemoteType::Step),
            "Tag" => Ok(RemoteType::Tag),
            "HumanUser" => Ok(RemoteType::HumanUser),
            other => Err(ModelError::unsupported("remote type", other)),
        }
    }
}

/// A typed link to a remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Record type.
    #[serde(rename = "type")]
    pub kind: RemoteType,
    /// Record id.
    pub id: i64,
}

impl RemoteRef {
    /// Creates a reference.
    pub fn new(kind: RemoteType, id: i64) -> Self {
        Self { kind, id }
    }

    /// Encodes the reference the way link fields store it.
    pub fn to_value(self) -> Value {
        json!({ "type": self.kind.as_str(), "id": self.id })
    }

    /// Decodes a link field value. Returns `None` for null or malformed links.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?.parse().ok()?;
        let id = obj.get("id")?.as_i64()?;
        Some(Self { kind, id })
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// A raw record as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record type.
    #[serde(rename = "type")]
    pub kind: RemoteType,
    /// Record id.
    pub id: i64,
    /// All other fields.
    #[serde(default)]
    pub fields: Fields,
}

impl RemoteRecord {
    /// Creates a record with no fields.
    pub fn new(kind: RemoteType, id: i64) -> Self {
        Self {
            kind,
            id,
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Reference to this record.
    pub fn to_ref(&self) -> RemoteRef {
        RemoteRef::new(self.kind, self.id)
    }

    /// Non-null field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Non-empty string field value.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Boolean field value, `false` when absent.
    pub fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Single-entity link field.
    pub fn link(&self, field: &str) -> Option<RemoteRef> {
        self.get(field).and_then(RemoteRef::from_value)
    }

    /// Display name embedded in a link field, if the API returned one.
    pub fn link_name(&self, field: &str) -> Option<&str> {
        self.get(field)?
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Multi-entity link field. Malformed entries are skipped.
    pub fn links(&self, field: &str) -> Vec<RemoteRef> {
        match self.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(RemoteRef::from_value).collect(),
            _ => Vec::new(),
        }
    }

    /// First of `candidates` present on the record, with its value.
    pub fn first_present<'a>(&'a self, candidates: &'a [String]) -> Option<(&'a str, &'a Value)> {
        candidates
            .iter()
            .find_map(|name| self.get(name).map(|v| (name.as_str(), v)))
    }
}

impl fmt::Display for RemoteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Equality filter used by remote queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field name. `id` filters on the record id.
    pub field: String,
    /// Expected value. Links compare by type and id only.
    pub value: Value,
}

impl Filter {
    /// Field equals value.
    pub fn is(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field links to `target`.
    pub fn link(field: impl Into<String>, target: RemoteRef) -> Self {
        Self::is(field, target.to_value())
    }

    /// Record id equals `id`.
    pub fn id(id: i64) -> Self {
        Self::is("id", id)
    }

    /// Evaluates the filter against a record.
    ///
    /// Multi-entity fields match when any element matches.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        if self.field == "id" {
            return self.value.as_i64() == Some(record.id);
        }
        let Some(actual) = record.fields.get(&self.field) else {
            return self.value.is_null();
        };
        match actual {
            Value::Array(items) if !self.value.is_array() => {
                items.iter().any(|item| values_match(item, &self.value))
            }
            other => values_match(other, &self.value),
        }
    }
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    match (RemoteRef::from_value(actual), RemoteRef::from_value(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

/// Data types of remote schema fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDataType {
    /// Free text.
    Text,
    /// Integer.
    Number,
    /// Floating point.
    Float,
    /// Boolean.
    Checkbox,
    /// Calendar date.
    Date,
    /// Timestamp.
    DateTime,
    /// Single choice from a list.
    List,
    /// Status short code.
    StatusList,
    /// Single entity link.
    Entity,
    /// Multiple entity links.
    MultiEntity,
}

/// Schema description of one remote field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Data type.
    pub data_type: FieldDataType,
    /// Whether the API accepts writes.
    #[serde(default = "default_editable")]
    pub editable: bool,
    /// Allowed values for list and status fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_values: Vec<String>,
}

fn default_editable() -> bool {
    true
}

impl FieldSchema {
    /// Editable field of the given type.
    pub fn new(name: impl Into<String>, data_type: FieldDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            editable: true,
            valid_values: Vec::new(),
        }
    }

    /// Marks the field read-only.
    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// Sets the allowed values.
    pub fn with_valid_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-project hierarchy configuration of the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Type name to parent-chain description, e.g. `Shot -> "Shot.sg_sequence"`.
    #[serde(default)]
    pub navchains: BTreeMap<String, String>,
    /// Entity types shown in the project.
    #[serde(default)]
    pub visible: BTreeSet<RemoteType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_type_round_trips_through_str() {
        for kind in RemoteType::FOLDERS {
            assert_eq!(kind.as_str().parse::<RemoteType>().unwrap(), kind);
        }
        assert!(matches!(
            "Playlist".parse::<RemoteType>(),
            Err(ModelError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn link_values_decode() {
        let value = json!({"type": "Sequence", "id": 4, "name": "SQ01"});
        assert_eq!(
            RemoteRef::from_value(&value),
            Some(RemoteRef::new(RemoteType::Sequence, 4))
        );
        assert_eq!(RemoteRef::from_value(&Value::Null), None);
        assert_eq!(RemoteRef::from_value(&json!({"type": "Nope", "id": 1})), None);
    }

    #[test]
    fn record_accessors_skip_nulls() {
        let record = RemoteRecord::new(RemoteType::Task, 9)
            .with_field("content", "Layout")
            .with_field("step", json!({"type": "Step", "id": 2, "name": "layout"}))
            .with_field("sg_hub_id", Value::Null)
            .with_field("tags", json!([{"type": "Tag", "id": 1}, 5]));

        assert_eq!(record.str_field("content"), Some("Layout"));
        assert_eq!(record.get("sg_hub_id"), None);
        assert_eq!(record.link_name("step"), Some("layout"));
        assert_eq!(record.links("tags"), vec![RemoteRef::new(RemoteType::Tag, 1)]);
    }

    #[test]
    fn filter_matches_links_and_arrays() {
        let project = RemoteRef::new(RemoteType::Project, 1);
        let record = RemoteRecord::new(RemoteType::Shot, 3)
            .with_field("project", json!({"type": "Project", "id": 1, "name": "demo"}))
            .with_field("tags", json!([{"type": "Tag", "id": 8}]))
            .with_field("code", "sh010");

        assert!(Filter::link("project", project).matches(&record));
        assert!(Filter::link("tags", RemoteRef::new(RemoteType::Tag, 8)).matches(&record));
        assert!(Filter::is("code", "sh010").matches(&record));
        assert!(!Filter::is("code", "sh020").matches(&record));
        assert!(Filter::id(3).matches(&record));
        assert!(Filter::is("sg_hub_id", Value::Null).matches(&record));
    }

    #[test]
    fn first_present_prefers_earlier_candidates() {
        let record = RemoteRecord::new(RemoteType::Shot, 1)
            .with_field("sg_status_list", "ip")
            .with_field("status_list", "wtg");
        let names = vec!["status_list".to_string(), "sg_status_list".to_string()];
        assert_eq!(
            record.first_present(&names),
            Some(("status_list", &json!("wtg")))
        );
    }
}
