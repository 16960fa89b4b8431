//! Translation between local attributes and remote fields.

use crate::client::RemoteClient;
use crate::config::{AttributeMapping, ASSIGNEES_ATTRIB, STATUS_ATTRIB, TAGS_ATTRIB};
use crate::error::SyncResult;
use crate::local::ProjectStatus;
use crate::schema::SchemaCache;
use hubsync_model::fields::{field_candidates, prefixed};
use hubsync_model::{Attributes, Fields, RemoteRecord, RemoteRef, RemoteType};
use serde_json::Value;
use tracing::warn;

/// Maps attributes through the configured attribute map.
///
/// Only mapped attributes ever cross between the systems.
#[derive(Debug, Clone)]
pub struct AttributeMapper {
    mappings: Vec<AttributeMapping>,
    statuses: Vec<ProjectStatus>,
}

impl AttributeMapper {
    /// Creates a mapper over the given mappings and the local status vocabulary.
    pub fn new(mappings: Vec<AttributeMapping>, statuses: Vec<ProjectStatus>) -> Self {
        Self { mappings, statuses }
    }

    /// All mappings.
    pub fn mappings(&self) -> &[AttributeMapping] {
        &self.mappings
    }

    /// Mapping for a local attribute on a remote type.
    pub fn mapping_for_local(&self, local: &str, kind: RemoteType) -> Option<&AttributeMapping> {
        self.mappings
            .iter()
            .find(|m| m.local == local && m.applies_to(kind))
    }

    /// Mapping for a remote field, bare or prefixed, on a remote type.
    pub fn mapping_for_remote_field(&self, field: &str, kind: RemoteType) -> Option<&AttributeMapping> {
        self.mappings
            .iter()
            .filter(|m| m.applies_to(kind))
            .find(|m| m.remote == field || prefixed(&m.remote) == field)
    }

    /// Remote field values for a local attribute bag.
    ///
    /// Attributes that are unmapped, out of scope, or whose field is missing
    /// or read-only on `kind` are left out.
    pub fn to_remote<R: RemoteClient + ?Sized>(
        &self,
        remote: &R,
        cache: &mut SchemaCache,
        attributes: &Attributes,
        kind: RemoteType,
    ) -> SyncResult<Fields> {
        let mut fields = Fields::new();
        for (key, value) in attributes {
            let Some(mapping) = self.mapping_for_local(key, kind) else {
                continue;
            };
            if let Some((field, converted)) = self.value_to_remote(remote, cache, mapping, kind, value)? {
                fields.insert(field, converted);
            }
        }
        Ok(fields)
    }

    /// Converts one mapped value, returning the target field and remote value.
    pub fn value_to_remote<R: RemoteClient + ?Sized>(
        &self,
        remote: &R,
        cache: &mut SchemaCache,
        mapping: &AttributeMapping,
        kind: RemoteType,
        value: &Value,
    ) -> SyncResult<Option<(String, Value)>> {
        let Some(schema) = cache.resolve_writable(remote, kind, &mapping.remote)? else {
            warn!(attribute = %mapping.local, remote_type = %kind, "no writable remote field, skipping");
            return Ok(None);
        };

        let converted = match mapping.local.as_str() {
            STATUS_ATTRIB => {
                let Some(name) = value.as_str() else {
                    return Ok(None);
                };
                let code = self.status_code(name);
                if !schema.valid_values.is_empty() && !schema.valid_values.iter().any(|v| v == code) {
                    warn!(status = %name, remote_type = %kind, "status not valid on remote type, skipping");
                    return Ok(None);
                }
                Value::String(code.to_string())
            }
            TAGS_ATTRIB => {
                let mut tags = Vec::new();
                for name in strings(value) {
                    tags.push(cache.tag(remote, name)?.to_value());
                }
                Value::Array(tags)
            }
            ASSIGNEES_ATTRIB => {
                let mut users = Vec::new();
                for login in strings(value) {
                    match cache.user(remote, login)? {
                        Some(user) => users.push(user.to_value()),
                        None => warn!(login = %login, "unknown remote user, skipping assignee"),
                    }
                }
                Value::Array(users)
            }
            _ => {
                if !value.is_null() && !mapping.value_type.accepts(value) {
                    warn!(
                        attribute = %mapping.local,
                        expected = ?mapping.value_type,
                        "attribute value has the wrong type, skipping"
                    );
                    return Ok(None);
                }
                value.clone()
            }
        };
        Ok(Some((schema.name, converted)))
    }

    /// Local attribute values for a remote record.
    pub fn to_local<R: RemoteClient + ?Sized>(
        &self,
        remote: &R,
        cache: &mut SchemaCache,
        record: &RemoteRecord,
    ) -> SyncResult<Attributes> {
        let mut attributes = Attributes::new();
        for mapping in self.mappings.iter().filter(|m| m.applies_to(record.kind)) {
            let candidates = field_candidates(&mapping.remote);
            let Some((_, value)) = record.first_present(&candidates) else {
                continue;
            };
            if let Some(converted) = self.value_to_local(remote, cache, mapping, value)? {
                attributes.insert(mapping.local.clone(), converted);
            }
        }
        Ok(attributes)
    }

    /// Converts one remote value into its local form.
    pub fn value_to_local<R: RemoteClient + ?Sized>(
        &self,
        remote: &R,
        cache: &mut SchemaCache,
        mapping: &AttributeMapping,
        value: &Value,
    ) -> SyncResult<Option<Value>> {
        let converted = match mapping.local.as_str() {
            STATUS_ATTRIB => {
                let Some(code) = value.as_str() else {
                    return Ok(None);
                };
                match self.status_name(code) {
                    Some(name) => Value::String(name.to_string()),
                    None => {
                        warn!(status = %code, "remote status unknown locally, skipping");
                        return Ok(None);
                    }
                }
            }
            TAGS_ATTRIB => {
                let mut names = Vec::new();
                for item in items(value) {
                    if let Some(name) = item.get("name").and_then(Value::as_str) {
                        names.push(Value::String(name.to_string()));
                    } else if let Some(tag) = RemoteRef::from_value(item) {
                        if let Some(name) = cache.tag_name(remote, tag)? {
                            names.push(Value::String(name));
                        }
                    }
                }
                Value::Array(names)
            }
            ASSIGNEES_ATTRIB => {
                let mut logins = Vec::new();
                for user in items(value).iter().filter_map(RemoteRef::from_value) {
                    if let Some(login) = cache.login(remote, user)? {
                        logins.push(Value::String(login));
                    }
                }
                Value::Array(logins)
            }
            _ => {
                if !value.is_null() && !mapping.value_type.accepts(value) {
                    warn!(attribute = %mapping.local, "remote value has the wrong type, skipping");
                    return Ok(None);
                }
                value.clone()
            }
        };
        Ok(Some(converted))
    }

    /// Short code of a local status name. Unknown names pass through.
    fn status_code<'a>(&'a self, name: &'a str) -> &'a str {
        self.statuses
            .iter()
            .find(|s| s.name == name || s.short_name == name)
            .map_or(name, |s| s.short_name.as_str())
    }

    /// Local status name for a remote short code.
    fn status_name(&self, code: &str) -> Option<&str> {
        self.statuses
            .iter()
            .find(|s| s.short_name.eq_ignore_ascii_case(code))
            .map(|s| s.name.as_str())
    }
}

fn strings(value: &Value) -> Vec<&str> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(s) => vec![s.as_str()],
        _ => Vec::new(),
    }
}

fn items(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeType;
    use crate::memory_remote::MemoryRemote;
    use hubsync_model::{FieldDataType, FieldSchema};
    use serde_json::json;

    fn mapper() -> AttributeMapper {
        let mut mappings = AttributeMapping::builtin();
        mappings.push(AttributeMapping::new("fps", "fps", AttributeType::Float).with_scope([RemoteType::Shot]));
        mappings.push(AttributeMapping::new("frameStart", "frame_start", AttributeType::Integer));
        AttributeMapper::new(
            mappings,
            vec![
                ProjectStatus::new("In progress", "ip"),
                ProjectStatus::new("Final", "fin"),
            ],
        )
    }

    fn remote() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.add_field(
            RemoteType::Shot,
            FieldSchema::new("sg_status_list", FieldDataType::StatusList).with_valid_values(["ip", "wtg"]),
        );
        remote.add_field(RemoteType::Shot, FieldSchema::new("sg_fps", FieldDataType::Float));
        remote.add_field(RemoteType::Shot, FieldSchema::new("tags", FieldDataType::MultiEntity));
        remote.add_field(
            RemoteType::Shot,
            FieldSchema::new("sg_frame_start", FieldDataType::Number).read_only(),
        );
        remote.add_field(RemoteType::Task, FieldSchema::new("task_assignees", FieldDataType::MultiEntity));
        remote
    }

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn only_mapped_writable_fields_are_sent() {
        let remote = remote();
        let mut cache = SchemaCache::new();
        let fields = mapper()
            .to_remote(
                &remote,
                &mut cache,
                &attrs(json!({"fps": 24.0, "frameStart": 1001, "resolutionWidth": 1920})),
                RemoteType::Shot,
            )
            .unwrap();

        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("sg_fps"), Some(&json!(24.0)));
    }

    #[test]
    fn status_is_translated_and_checked_against_valid_values() {
        let remote = remote();
        let mut cache = SchemaCache::new();
        let m = mapper();

        let fields = m
            .to_remote(&remote, &mut cache, &attrs(json!({"status": "In progress"})), RemoteType::Shot)
            .unwrap();
        assert_eq!(fields.get("sg_status_list"), Some(&json!("ip")));

        let rejected = m
            .to_remote(&remote, &mut cache, &attrs(json!({"status": "Final"})), RemoteType::Shot)
            .unwrap();
        assert!(rejected.is_empty());
    }

    #[test]
    fn unknown_tags_are_created_before_linking() {
        let remote = remote();
        let mut cache = SchemaCache::new();
        let fields = mapper()
            .to_remote(&remote, &mut cache, &attrs(json!({"tags": ["hero"]})), RemoteType::Shot)
            .unwrap();

        let tags = remote.records(RemoteType::Tag);
        assert_eq!(tags.len(), 1);
        assert_eq!(fields.get("tags"), Some(&json!([tags[0].to_ref().to_value()])));
    }

    #[test]
    fn unknown_assignees_are_skipped() {
        let remote = remote();
        let user = remote.insert(
            RemoteType::HumanUser,
            [("login".to_string(), json!("jdoe"))].into_iter().collect(),
        );
        let mut cache = SchemaCache::new();
        let fields = mapper()
            .to_remote(
                &remote,
                &mut cache,
                &attrs(json!({"assignees": ["jdoe", "ghost"]})),
                RemoteType::Task,
            )
            .unwrap();
        assert_eq!(fields.get("task_assignees"), Some(&json!([user.to_ref().to_value()])));
    }

    #[test]
    fn wrong_value_type_is_skipped() {
        let remote = remote();
        let mut cache = SchemaCache::new();
        let fields = mapper()
            .to_remote(&remote, &mut cache, &attrs(json!({"fps": "fast"})), RemoteType::Shot)
            .unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn remote_values_map_back_to_local_names() {
        let remote = remote();
        let tag = remote.insert(RemoteType::Tag, [("name".to_string(), json!("hero"))].into_iter().collect());
        let record = RemoteRecord::new(RemoteType::Shot, 9)
            .with_field("sg_status_list", "ip")
            .with_field("sg_fps", 25.0)
            .with_field("tags", json!([tag.to_ref().to_value()]))
            .with_field("description", "ignored");

        let mut cache = SchemaCache::new();
        let local = mapper().to_local(&remote, &mut cache, &record).unwrap();
        assert_eq!(
            local,
            attrs(json!({"status": "In progress", "fps": 25.0, "tags": ["hero"]}))
        );
    }

    #[test]
    fn remote_field_lookup_accepts_prefixed_names() {
        let m = mapper();
        assert_eq!(
            m.mapping_for_remote_field("sg_fps", RemoteType::Shot).map(|m| m.local.as_str()),
            Some("fps")
        );
        assert!(m.mapping_for_remote_field("sg_fps", RemoteType::Asset).is_none());
        assert!(m.mapping_for_remote_field("description", RemoteType::Shot).is_none());
    }
}
