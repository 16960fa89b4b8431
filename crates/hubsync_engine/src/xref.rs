//! Cross-references stored as attributes on both sides.
//!
//! The local entity carries the remote id and type; the remote record carries
//! the local id and the sync status. There is no separate index: the pair is
//! rebuilt from the two trees on every run.

use crate::client::RemoteClient;
use crate::error::{SyncError, SyncResult};
use crate::local::{remote_id_value, LocalTree};
use crate::report::SyncReport;
use hubsync_model::fields::{LOCAL_ID_FIELD, REMOTE_ID_ATTRIB, REMOTE_TYPE_ATTRIB, REMOVED, SYNC_STATUS_FIELD};
use hubsync_model::{Fields, RemoteRecord, SyncStatus};
use serde_json::Value;
use tracing::warn;

/// Reads and writes identifier pairs.
pub struct CrossReferenceStore<'a, R: RemoteClient + ?Sized> {
    remote: &'a R,
}

impl<'a, R: RemoteClient + ?Sized> CrossReferenceStore<'a, R> {
    /// Creates a store writing through `remote`.
    pub fn new(remote: &'a R) -> Self {
        Self { remote }
    }

    /// Local id recorded on a remote record.
    pub fn get<'r>(&self, record: &'r RemoteRecord) -> Option<&'r str> {
        record.str_field(LOCAL_ID_FIELD)
    }

    /// Links a local entity and a remote record.
    ///
    /// The local half is staged in `tree` and refuses to repoint an entity
    /// already linked to another record. The remote half is written only when
    /// it differs; a failed write is logged and downgrades `report` but is
    /// not returned.
    pub fn set(
        &self,
        tree: &mut LocalTree,
        local_id: &str,
        record: &mut RemoteRecord,
        status: SyncStatus,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let entity = tree
            .get(local_id)
            .ok_or_else(|| SyncError::NotFound(format!("local entity {local_id}")))?;
        if let Some(current) = entity.remote_ref() {
            if current != record.to_ref() {
                return Err(SyncError::CrossReferenceMismatch {
                    entity: entity.describe(),
                    expected: current.to_string(),
                    found: record.to_string(),
                });
            }
        }
        tree.set_attribute(local_id, REMOTE_ID_ATTRIB, remote_id_value(record.id));
        tree.set_attribute(
            local_id,
            REMOTE_TYPE_ATTRIB,
            Value::String(record.kind.as_str().to_string()),
        );

        let mut fields = Fields::new();
        if self.get(record) != Some(local_id) {
            fields.insert(LOCAL_ID_FIELD.to_string(), Value::String(local_id.to_string()));
        }
        if record.str_field(SYNC_STATUS_FIELD) != Some(status.as_str()) {
            fields.insert(SYNC_STATUS_FIELD.to_string(), Value::String(status.as_str().to_string()));
        }
        self.write(record, fields, report);
        Ok(())
    }

    /// Marks a local entity removed so tree walks skip it.
    pub fn mark_removed_local(&self, tree: &mut LocalTree, local_id: &str) -> bool {
        tree.set_attribute(local_id, REMOTE_ID_ATTRIB, Value::String(REMOVED.to_string()))
    }

    /// Marks a remote record removed and skipped.
    pub fn mark_removed_remote(&self, record: &mut RemoteRecord, report: &mut SyncReport) {
        let mut fields = Fields::new();
        fields.insert(LOCAL_ID_FIELD.to_string(), Value::String(REMOVED.to_string()));
        fields.insert(
            SYNC_STATUS_FIELD.to_string(),
            Value::String(SyncStatus::Skipped.as_str().to_string()),
        );
        self.write(record, fields, report);
    }

    /// Writes only the status of a remote record, if it differs.
    pub fn write_status(&self, record: &mut RemoteRecord, status: SyncStatus, report: &mut SyncReport) {
        if record.str_field(SYNC_STATUS_FIELD) == Some(status.as_str()) {
            return;
        }
        let mut fields = Fields::new();
        fields.insert(SYNC_STATUS_FIELD.to_string(), Value::String(status.as_str().to_string()));
        self.write(record, fields, report);
    }

    fn write(&self, record: &mut RemoteRecord, fields: Fields, report: &mut SyncReport) {
        if fields.is_empty() {
            return;
        }
        match self.remote.update(record.kind, record.id, &fields) {
            Ok(updated) => *record = updated,
            Err(e) => {
                warn!(remote = %record, error = %e, "failed to write cross-reference");
                report.downgrade(format!("cross-reference write to {record} failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalEntity, LocalProject};
    use crate::memory_remote::MemoryRemote;
    use hubsync_model::{RemoteRef, RemoteType};

    fn tree() -> LocalTree {
        LocalTree::from_parts(
            LocalProject::new("demo"),
            vec![LocalEntity::folder("f1", None, "Shot", "sh010")],
        )
    }

    #[test]
    fn set_writes_both_halves_once() {
        let remote = MemoryRemote::new();
        let mut record = remote.insert(RemoteType::Shot, Fields::new());
        let mut tree = tree();
        let mut report = SyncReport::new("demo");
        let store = CrossReferenceStore::new(&remote);

        store.set(&mut tree, "f1", &mut record, SyncStatus::Synced, &mut report).unwrap();
        assert_eq!(tree.get("f1").unwrap().remote_ref(), Some(record.to_ref()));
        assert_eq!(store.get(&record), Some("f1"));
        assert_eq!(record.str_field(SYNC_STATUS_FIELD), Some("Synced"));

        store.set(&mut tree, "f1", &mut record, SyncStatus::Synced, &mut report).unwrap();
        assert_eq!(remote.counters().updates, 1);
        assert!(report.is_synced());
    }

    #[test]
    fn set_refuses_to_repoint() {
        let remote = MemoryRemote::new();
        let mut other = remote.insert(RemoteType::Shot, Fields::new());
        let mut tree = tree();
        tree.set_attribute("f1", REMOTE_ID_ATTRIB, remote_id_value(other.id + 100));
        tree.set_attribute("f1", REMOTE_TYPE_ATTRIB, Value::String("Shot".into()));
        let mut report = SyncReport::new("demo");

        let err = CrossReferenceStore::new(&remote)
            .set(&mut tree, "f1", &mut other, SyncStatus::Synced, &mut report)
            .unwrap_err();
        assert!(matches!(err, SyncError::CrossReferenceMismatch { .. }));
        assert_eq!(
            tree.get("f1").unwrap().remote_ref(),
            Some(RemoteRef::new(RemoteType::Shot, other.id + 100))
        );
    }

    #[test]
    fn failed_remote_write_downgrades_without_error() {
        let remote = MemoryRemote::new();
        let mut record = remote.insert(RemoteType::Shot, Fields::new());
        remote.fail_writes_to(LOCAL_ID_FIELD);
        let mut tree = tree();
        let mut report = SyncReport::new("demo");

        CrossReferenceStore::new(&remote)
            .set(&mut tree, "f1", &mut record, SyncStatus::Synced, &mut report)
            .unwrap();
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(tree.get("f1").unwrap().remote_ref(), Some(record.to_ref()));
    }

    #[test]
    fn removed_markers() {
        let remote = MemoryRemote::new();
        let mut record = remote.insert(RemoteType::Shot, Fields::new());
        let mut tree = tree();
        let mut report = SyncReport::new("demo");

        let store = CrossReferenceStore::new(&remote);

        assert!(store.mark_removed_local(&mut tree, "f1"));
        assert!(tree.get("f1").unwrap().is_removed());

        store.mark_removed_remote(&mut record, &mut report);
        assert_eq!(record.str_field(LOCAL_ID_FIELD), Some(REMOVED));
        assert_eq!(record.str_field(SYNC_STATUS_FIELD), Some("Skipped"));
    }
}
