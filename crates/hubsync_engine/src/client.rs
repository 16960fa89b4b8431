//! Client abstractions for the two systems.
//!
//! Both traits are blocking request/response interfaces. Implementations must
//! be `Send + Sync` so different projects can run on different threads.

use crate::error::SyncResult;
use crate::local::{ChangeSet, LocalEntity, LocalProject};
use hubsync_model::{FieldSchema, Fields, Filter, RemoteRecord, RemoteType, TrackingSettings};
use std::path::Path;
use std::sync::Arc;

/// Typed client of the remote tracking service.
pub trait RemoteClient: Send + Sync {
    /// Active records of `kind` matching every filter, ordered by id.
    fn find(&self, kind: RemoteType, filters: &[Filter]) -> SyncResult<Vec<RemoteRecord>>;

    /// First active record matching every filter.
    fn find_one(&self, kind: RemoteType, filters: &[Filter]) -> SyncResult<Option<RemoteRecord>> {
        Ok(self.find(kind, filters)?.into_iter().next())
    }

    /// A retired record by id.
    fn find_retired(&self, kind: RemoteType, id: i64) -> SyncResult<Option<RemoteRecord>>;

    /// Creates a record and returns it with its new id.
    fn create(&self, kind: RemoteType, data: &Fields) -> SyncResult<RemoteRecord>;

    /// Updates fields of a record and returns the updated record.
    fn update(&self, kind: RemoteType, id: i64, data: &Fields) -> SyncResult<RemoteRecord>;

    /// Retires a record. Returns false if it did not exist.
    fn delete(&self, kind: RemoteType, id: i64) -> SyncResult<bool>;

    /// Schema of one field, `None` if the field does not exist.
    fn schema_field_read(&self, kind: RemoteType, field: &str) -> SyncResult<Option<FieldSchema>>;

    /// Adds a field to the schema of `kind`.
    fn schema_field_create(&self, kind: RemoteType, schema: &FieldSchema) -> SyncResult<()>;

    /// Hierarchy configuration of a project.
    fn tracking_settings(&self, project_id: i64) -> SyncResult<TrackingSettings>;

    /// Uploads a file into a field of a record and returns the attachment id.
    fn upload(&self, kind: RemoteType, id: i64, field: &str, path: &Path) -> SyncResult<i64>;
}

/// Typed client of the local project hub.
///
/// Entity creation and mutation are buffered by
/// [`LocalTree`](crate::LocalTree) and reach the hub in a single
/// [`commit`](LocalHub::commit).
pub trait LocalHub: Send + Sync {
    /// A project by name.
    fn query_project(&self, name: &str) -> SyncResult<Option<LocalProject>>;

    /// Every folder, task and version of a project, parents before children.
    fn query_entities(&self, project: &str) -> SyncResult<Vec<LocalEntity>>;

    /// One entity by id.
    fn get_by_id(&self, project: &str, id: &str) -> SyncResult<Option<LocalEntity>>;

    /// Applies a change set atomically: all of it or none of it.
    fn commit(&self, project: &str, changes: &ChangeSet) -> SyncResult<()>;
}

impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    fn find(&self, kind: RemoteType, filters: &[Filter]) -> SyncResult<Vec<RemoteRecord>> {
        (**self).find(kind, filters)
    }

    fn find_one(&self, kind: RemoteType, filters: &[Filter]) -> SyncResult<Option<RemoteRecord>> {
        (**self).find_one(kind, filters)
    }

    fn find_retired(&self, kind: RemoteType, id: i64) -> SyncResult<Option<RemoteRecord>> {
        (**self).find_retired(kind, id)
    }

    fn create(&self, kind: RemoteType, data: &Fields) -> SyncResult<RemoteRecord> {
        (**self).create(kind, data)
    }

    fn update(&self, kind: RemoteType, id: i64, data: &Fields) -> SyncResult<RemoteRecord> {
        (**self).update(kind, id, data)
    }

    fn delete(&self, kind: RemoteType, id: i64) -> SyncResult<bool> {
        (**self).delete(kind, id)
    }

    fn schema_field_read(&self, kind: RemoteType, field: &str) -> SyncResult<Option<FieldSchema>> {
        (**self).schema_field_read(kind, field)
    }

    fn schema_field_create(&self, kind: RemoteType, schema: &FieldSchema) -> SyncResult<()> {
        (**self).schema_field_create(kind, schema)
    }

    fn tracking_settings(&self, project_id: i64) -> SyncResult<TrackingSettings> {
        (**self).tracking_settings(project_id)
    }

    fn upload(&self, kind: RemoteType, id: i64, field: &str, path: &Path) -> SyncResult<i64> {
        (**self).upload(kind, id, field, path)
    }
}

impl<T: LocalHub + ?Sized> LocalHub for Arc<T> {
    fn query_project(&self, name: &str) -> SyncResult<Option<LocalProject>> {
        (**self).query_project(name)
    }

    fn query_entities(&self, project: &str) -> SyncResult<Vec<LocalEntity>> {
        (**self).query_entities(project)
    }

    fn get_by_id(&self, project: &str, id: &str) -> SyncResult<Option<LocalEntity>> {
        (**self).get_by_id(project, id)
    }

    fn commit(&self, project: &str, changes: &ChangeSet) -> SyncResult<()> {
        (**self).commit(project, changes)
    }
}
