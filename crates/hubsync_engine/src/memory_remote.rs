//! In-memory remote tracking service.

use crate::client::RemoteClient;
use crate::error::{SyncError, SyncResult};
use hubsync_model::fields::RETIREMENT_FIELD;
use hubsync_model::{
    FieldSchema, Fields, Filter, RemoteRecord, RemoteRef, RemoteType, TrackingSettings,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Serializable state of a [`MemoryRemote`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Active records.
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    /// Retired records.
    #[serde(default)]
    pub retired: Vec<RemoteRecord>,
    /// Field schemas, keyed by type name.
    #[serde(default)]
    pub schema: BTreeMap<String, Vec<FieldSchema>>,
    /// Tracking settings, keyed by project id.
    #[serde(default)]
    pub tracking: BTreeMap<String, TrackingSettings>,
}

/// Write counters of a [`MemoryRemote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCounters {
    /// Records created.
    pub creates: usize,
    /// Records updated.
    pub updates: usize,
    /// Records retired.
    pub deletes: usize,
}

#[derive(Default)]
struct RemoteState {
    records: BTreeMap<(RemoteType, i64), RemoteRecord>,
    retired: BTreeMap<(RemoteType, i64), RemoteRecord>,
    schema: HashMap<RemoteType, BTreeMap<String, FieldSchema>>,
    tracking: HashMap<i64, TrackingSettings>,
    attachments: Vec<(RemoteRef, String, PathBuf)>,
    next_id: i64,
}

impl RemoteState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_fields(&self, kind: RemoteType, data: &Fields) -> SyncResult<()> {
        let Some(fields) = self.schema.get(&kind).filter(|f| !f.is_empty()) else {
            return Ok(());
        };
        for name in data.keys() {
            match fields.get(name) {
                None => {
                    return Err(SyncError::Remote(format!("{kind} has no field '{name}'")));
                }
                Some(schema) if !schema.editable => {
                    return Err(SyncError::Remote(format!("{kind}.{name} is not editable")));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// An in-memory [`RemoteClient`] for tests and offline runs.
///
/// Writes are checked against the registered schema of a type once it has
/// any fields. Outages and write failures can be injected.
#[derive(Default)]
pub struct MemoryRemote {
    state: RwLock<RemoteState>,
    offline: AtomicBool,
    failing_fields: RwLock<HashSet<String>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a service from a snapshot.
    pub fn from_snapshot(snapshot: RemoteSnapshot) -> SyncResult<Self> {
        let remote = Self::new();
        {
            let mut state = remote.state.write();
            for record in snapshot.records {
                state.next_id = state.next_id.max(record.id);
                state.records.insert((record.kind, record.id), record);
            }
            for record in snapshot.retired {
                state.next_id = state.next_id.max(record.id);
                state.retired.insert((record.kind, record.id), record);
            }
            for (kind, fields) in snapshot.schema {
                let kind: RemoteType = kind.parse()?;
                let entry = state.schema.entry(kind).or_default();
                for field in fields {
                    entry.insert(field.name.clone(), field);
                }
            }
            for (project, settings) in snapshot.tracking {
                let id: i64 = project.parse().map_err(|_| {
                    SyncError::precondition(format!("invalid project id '{project}' in snapshot"))
                })?;
                state.tracking.insert(id, settings);
            }
        }
        Ok(remote)
    }

    /// Captures the current state.
    pub fn snapshot(&self) -> RemoteSnapshot {
        let state = self.state.read();
        RemoteSnapshot {
            records: state.records.values().cloned().collect(),
            retired: state.retired.values().cloned().collect(),
            schema: state
                .schema
                .iter()
                .map(|(kind, fields)| (kind.as_str().to_string(), fields.values().cloned().collect()))
                .collect(),
            tracking: state
                .tracking
                .iter()
                .map(|(id, settings)| (id.to_string(), settings.clone()))
                .collect(),
        }
    }

    /// Inserts a record directly, bypassing counters and schema checks.
    pub fn insert(&self, kind: RemoteType, fields: Fields) -> RemoteRecord {
        let mut state = self.state.write();
        let id = state.allocate_id();
        let record = RemoteRecord { kind, id, fields };
        state.records.insert((kind, id), record.clone());
        record
    }

    /// Registers a schema field.
    pub fn add_field(&self, kind: RemoteType, schema: FieldSchema) {
        self.state
            .write()
            .schema
            .entry(kind)
            .or_default()
            .insert(schema.name.clone(), schema);
    }

    /// Sets the tracking settings of a project.
    pub fn set_tracking(&self, project_id: i64, settings: TrackingSettings) {
        self.state.write().tracking.insert(project_id, settings);
    }

    /// An active record.
    pub fn record(&self, target: RemoteRef) -> Option<RemoteRecord> {
        self.state.read().records.get(&(target.kind, target.id)).cloned()
    }

    /// All active records of a type.
    pub fn records(&self, kind: RemoteType) -> Vec<RemoteRecord> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Overwrites fields of a record, bypassing counters.
    pub fn patch(&self, target: RemoteRef, fields: Fields) -> bool {
        let mut state = self.state.write();
        match state.records.get_mut(&(target.kind, target.id)) {
            Some(record) => {
                record.fields.extend(fields);
                true
            }
            None => false,
        }
    }

    /// Retires a record, bypassing counters.
    pub fn retire(&self, target: RemoteRef) -> bool {
        let mut state = self.state.write();
        Self::retire_locked(&mut state, target)
    }

    /// Restores a retired record, bypassing counters.
    pub fn revive(&self, target: RemoteRef) -> bool {
        let mut state = self.state.write();
        match state.retired.remove(&(target.kind, target.id)) {
            Some(mut record) => {
                record.fields.insert(RETIREMENT_FIELD.to_string(), Value::Null);
                state.records.insert((target.kind, target.id), record);
                true
            }
            None => false,
        }
    }

    fn retire_locked(state: &mut RemoteState, target: RemoteRef) -> bool {
        match state.records.remove(&(target.kind, target.id)) {
            Some(mut record) => {
                record
                    .fields
                    .insert(RETIREMENT_FIELD.to_string(), Value::String("retired".into()));
                state.retired.insert((target.kind, target.id), record);
                true
            }
            None => false,
        }
    }

    /// Simulates an unreachable service.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every update touching `field` fail with a retryable transport error.
    pub fn fail_writes_to(&self, field: &str) {
        self.failing_fields.write().insert(field.to_string());
    }

    /// Clears injected write failures.
    pub fn clear_write_failures(&self) {
        self.failing_fields.write().clear();
    }

    /// Write counters since creation or the last reset.
    pub fn counters(&self) -> RemoteCounters {
        RemoteCounters {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Resets the write counters.
    pub fn reset_counters(&self) {
        self.creates.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    /// Uploaded attachments as `(record, field, path)`.
    pub fn attachments(&self) -> Vec<(RemoteRef, String, PathBuf)> {
        self.state.read().attachments.clone()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::transport_retryable("remote service unreachable"))
        } else {
            Ok(())
        }
    }
}

impl RemoteClient for MemoryRemote {
    fn find(&self, kind: RemoteType, filters: &[Filter]) -> SyncResult<Vec<RemoteRecord>> {
        self.check_online()?;
        let state = self.state.read();
        Ok(state
            .records
            .range((kind, i64::MIN)..=(kind, i64::MAX))
            .map(|(_, record)| record)
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .cloned()
            .collect())
    }

    fn find_retired(&self, kind: RemoteType, id: i64) -> SyncResult<Option<RemoteRecord>> {
        self.check_online()?;
        Ok(self.state.read().retired.get(&(kind, id)).cloned())
    }

    fn create(&self, kind: RemoteType, data: &Fields) -> SyncResult<RemoteRecord> {
        self.check_online()?;
        let mut state = self.state.write();
        state.check_fields(kind, data)?;
        let id = state.allocate_id();
        let record = RemoteRecord {
            kind,
            id,
            fields: data.clone(),
        };
        state.records.insert((kind, id), record.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    fn update(&self, kind: RemoteType, id: i64, data: &Fields) -> SyncResult<RemoteRecord> {
        self.check_online()?;
        if let Some(field) = data.keys().find(|k| self.failing_fields.read().contains(*k)) {
            return Err(SyncError::transport_retryable(format!(
                "write to {kind}.{field} timed out"
            )));
        }
        let mut state = self.state.write();
        state.check_fields(kind, data)?;
        let record = state
            .records
            .get_mut(&(kind, id))
            .ok_or_else(|| SyncError::Remote(format!("{kind} #{id} does not exist")))?;
        record
            .fields
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        let updated = record.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    fn delete(&self, kind: RemoteType, id: i64) -> SyncResult<bool> {
        self.check_online()?;
        let mut state = self.state.write();
        let retired = Self::retire_locked(&mut state, RemoteRef::new(kind, id));
        if retired {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(retired)
    }

    fn schema_field_read(&self, kind: RemoteType, field: &str) -> SyncResult<Option<FieldSchema>> {
        self.check_online()?;
        Ok(self
            .state
            .read()
            .schema
            .get(&kind)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    fn schema_field_create(&self, kind: RemoteType, schema: &FieldSchema) -> SyncResult<()> {
        self.check_online()?;
        let mut state = self.state.write();
        let fields = state.schema.entry(kind).or_default();
        if fields.contains_key(&schema.name) {
            return Err(SyncError::Remote(format!(
                "{kind}.{} already exists",
                schema.name
            )));
        }
        fields.insert(schema.name.clone(), schema.clone());
        Ok(())
    }

    fn tracking_settings(&self, project_id: i64) -> SyncResult<TrackingSettings> {
        self.check_online()?;
        Ok(self
            .state
            .read()
            .tracking
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    fn upload(&self, kind: RemoteType, id: i64, field: &str, path: &Path) -> SyncResult<i64> {
        self.check_online()?;
        let mut state = self.state.write();
        if !state.records.contains_key(&(kind, id)) {
            return Err(SyncError::Remote(format!("{kind} #{id} does not exist")));
        }
        let attachment = state.allocate_id();
        state
            .attachments
            .push((RemoteRef::new(kind, id), field.to_string(), path.to_path_buf()));
        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_model::FieldDataType;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn create_find_update_delete() {
        let remote = MemoryRemote::new();
        let project = remote.insert(RemoteType::Project, fields(&[("name", json!("demo"))]));

        let shot = remote
            .create(
                RemoteType::Shot,
                &fields(&[("code", json!("sh010")), ("project", project.to_ref().to_value())]),
            )
            .unwrap();
        let found = remote
            .find(RemoteType::Shot, &[Filter::link("project", project.to_ref())])
            .unwrap();
        assert_eq!(found, vec![shot.clone()]);

        let updated = remote
            .update(RemoteType::Shot, shot.id, &fields(&[("code", json!("sh010b"))]))
            .unwrap();
        assert_eq!(updated.str_field("code"), Some("sh010b"));

        assert!(remote.delete(RemoteType::Shot, shot.id).unwrap());
        assert!(remote.find(RemoteType::Shot, &[]).unwrap().is_empty());
        assert!(remote.find_retired(RemoteType::Shot, shot.id).unwrap().is_some());
        assert_eq!(
            remote.counters(),
            RemoteCounters {
                creates: 1,
                updates: 1,
                deletes: 1
            }
        );
    }

    #[test]
    fn registered_schema_is_enforced() {
        let remote = MemoryRemote::new();
        remote.add_field(RemoteType::Shot, FieldSchema::new("code", FieldDataType::Text));
        remote.add_field(
            RemoteType::Shot,
            FieldSchema::new("sg_frames", FieldDataType::Number).read_only(),
        );

        let err = remote
            .create(RemoteType::Shot, &fields(&[("sg_cut_in", json!(1))]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        let err = remote
            .create(RemoteType::Shot, &fields(&[("sg_frames", json!(1))]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(remote
            .create(RemoteType::Shot, &fields(&[("code", json!("a"))]))
            .is_ok());
    }

    #[test]
    fn offline_service_fails_with_retryable_transport_error() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let err = remote.find(RemoteType::Shot, &[]).unwrap_err();
        assert!(err.is_retryable());
        remote.set_offline(false);
        assert!(remote.find(RemoteType::Shot, &[]).is_ok());
    }

    #[test]
    fn injected_write_failure_targets_one_field() {
        let remote = MemoryRemote::new();
        let shot = remote.insert(RemoteType::Shot, Fields::new());
        remote.fail_writes_to("sg_hub_id");

        assert!(remote
            .update(RemoteType::Shot, shot.id, &fields(&[("sg_hub_id", json!("x"))]))
            .is_err());
        assert!(remote
            .update(RemoteType::Shot, shot.id, &fields(&[("code", json!("x"))]))
            .is_ok());
    }

    #[test]
    fn upload_records_attachment() {
        let remote = MemoryRemote::new();
        let version = remote.insert(RemoteType::Version, Fields::new());
        remote
            .upload(RemoteType::Version, version.id, "sg_uploaded_movie", Path::new("/tmp/review.mov"))
            .unwrap();
        assert_eq!(remote.attachments().len(), 1);
        assert!(remote
            .upload(RemoteType::Version, 999, "sg_uploaded_movie", Path::new("/tmp/x.mov"))
            .is_err());
    }

    #[test]
    fn snapshot_round_trip_keeps_ids_unique() {
        let remote = MemoryRemote::new();
        remote.insert(RemoteType::Project, Fields::new());
        remote.add_field(RemoteType::Shot, FieldSchema::new("code", FieldDataType::Text));
        remote.set_tracking(1, TrackingSettings::default());

        let restored = MemoryRemote::from_snapshot(remote.snapshot()).unwrap();
        let next = restored.insert(RemoteType::Shot, Fields::new());
        assert_eq!(next.id, 2);
        assert!(restored
            .schema_field_read(RemoteType::Shot, "code")
            .unwrap()
            .is_some());
    }
}
