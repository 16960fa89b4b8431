//! Read-through cache of remote schema and lookup records.
//!
//! A cache lives for exactly one run and is dropped with it, so schema edits
//! on the remote side are picked up by the next run.

use crate::client::RemoteClient;
use crate::error::SyncResult;
use hubsync_model::fields::field_candidates;
use hubsync_model::{FieldSchema, Fields, Filter, RemoteRecord, RemoteRef, RemoteType};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Per-run cache of field schemas, pipeline steps, tags and users.
#[derive(Debug, Default)]
pub struct SchemaCache {
    fields: HashMap<(RemoteType, String), Option<FieldSchema>>,
    steps: Option<Vec<RemoteRecord>>,
    tags: Option<TagIndex>,
    users: HashMap<String, Option<RemoteRef>>,
    logins: HashMap<i64, Option<String>>,
}

#[derive(Debug, Default)]
struct TagIndex {
    by_name: HashMap<String, RemoteRef>,
    by_id: HashMap<i64, String>,
}

impl TagIndex {
    fn insert(&mut self, name: &str, tag: RemoteRef) {
        self.by_name.insert(name.to_lowercase(), tag);
        self.by_id.insert(tag.id, name.to_string());
    }
}

impl SchemaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema of one field, `None` if the field does not exist.
    pub fn field<R: RemoteClient + ?Sized>(
        &mut self,
        remote: &R,
        kind: RemoteType,
        name: &str,
    ) -> SyncResult<Option<FieldSchema>> {
        let key = (kind, name.to_string());
        if let Some(cached) = self.fields.get(&key) {
            return Ok(cached.clone());
        }
        let schema = remote.schema_field_read(kind, name)?;
        self.fields.insert(key, schema.clone());
        Ok(schema)
    }

    /// First existing field among the bare and prefixed names.
    pub fn resolve<R: RemoteClient + ?Sized>(
        &mut self,
        remote: &R,
        kind: RemoteType,
        name: &str,
    ) -> SyncResult<Option<FieldSchema>> {
        for candidate in field_candidates(name) {
            if let Some(schema) = self.field(remote, kind, &candidate)? {
                return Ok(Some(schema));
            }
        }
        Ok(None)
    }

    /// First existing and editable field among the bare and prefixed names.
    pub fn resolve_writable<R: RemoteClient + ?Sized>(
        &mut self,
        remote: &R,
        kind: RemoteType,
        name: &str,
    ) -> SyncResult<Option<FieldSchema>> {
        for candidate in field_candidates(name) {
            match self.field(remote, kind, &candidate)? {
                Some(schema) if schema.editable => return Ok(Some(schema)),
                _ => {}
            }
        }
        Ok(None)
    }

    /// All pipeline steps.
    pub fn steps<R: RemoteClient + ?Sized>(&mut self, remote: &R) -> SyncResult<&[RemoteRecord]> {
        if self.steps.is_none() {
            self.steps = Some(remote.find(RemoteType::Step, &[])?);
        }
        Ok(self.steps.as_deref().unwrap_or_default())
    }

    /// The pipeline step whose code matches a task type, ignoring case.
    pub fn step_for<R: RemoteClient + ?Sized>(
        &mut self,
        remote: &R,
        task_type: &str,
    ) -> SyncResult<Option<RemoteRecord>> {
        Ok(self
            .steps(remote)?
            .iter()
            .find(|step| {
                step.str_field("code")
                    .is_some_and(|code| code.eq_ignore_ascii_case(task_type))
            })
            .cloned())
    }

    fn tag_index<R: RemoteClient + ?Sized>(&mut self, remote: &R) -> SyncResult<&mut TagIndex> {
        if self.tags.is_none() {
            let mut index = TagIndex::default();
            for tag in remote.find(RemoteType::Tag, &[])? {
                if let Some(name) = tag.str_field("name") {
                    index.insert(name, tag.to_ref());
                }
            }
            self.tags = Some(index);
        }
        Ok(self.tags.get_or_insert_with(TagIndex::default))
    }

    /// Tag with the given name, created on the remote side if missing.
    pub fn tag<R: RemoteClient + ?Sized>(&mut self, remote: &R, name: &str) -> SyncResult<RemoteRef> {
        if let Some(tag) = self.tag_index(remote)?.by_name.get(&name.to_lowercase()) {
            return Ok(*tag);
        }
        let mut data = Fields::new();
        data.insert("name".to_string(), Value::String(name.to_string()));
        let created = remote.create(RemoteType::Tag, &data)?;
        debug!(tag = %name, id = created.id, "created remote tag");
        let tag = created.to_ref();
        self.tag_index(remote)?.insert(name, tag);
        Ok(tag)
    }

    /// Name of a tag.
    pub fn tag_name<R: RemoteClient + ?Sized>(&mut self, remote: &R, tag: RemoteRef) -> SyncResult<Option<String>> {
        Ok(self.tag_index(remote)?.by_id.get(&tag.id).cloned())
    }

    /// User with the given login.
    pub fn user<R: RemoteClient + ?Sized>(&mut self, remote: &R, login: &str) -> SyncResult<Option<RemoteRef>> {
        if let Some(cached) = self.users.get(login) {
            return Ok(*cached);
        }
        let user = remote
            .find_one(RemoteType::HumanUser, &[Filter::is("login", login)])?
            .map(|u| u.to_ref());
        self.users.insert(login.to_string(), user);
        if let Some(user) = user {
            self.logins.insert(user.id, Some(login.to_string()));
        }
        Ok(user)
    }

    /// Login of a user.
    pub fn login<R: RemoteClient + ?Sized>(&mut self, remote: &R, user: RemoteRef) -> SyncResult<Option<String>> {
        if let Some(cached) = self.logins.get(&user.id) {
            return Ok(cached.clone());
        }
        let login = remote
            .find_one(RemoteType::HumanUser, &[Filter::id(user.id)])?
            .and_then(|u| u.str_field("login").map(str::to_string));
        self.logins.insert(user.id, login.clone());
        Ok(login)
    }
}
