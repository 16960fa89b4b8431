//! Projection of raw remote records onto [`SyncEntity`].

use crate::config::AttributeMapping;
use crate::error::{SyncError, SyncResult};
use hubsync_model::fields::{field_candidates, ENTITY_FIELD, GROUPING_FIELD, LOCAL_ID_FIELD, SYNC_STATUS_FIELD};
use hubsync_model::{slugify, ModelError, ParentRef, RemoteRecord, RemoteType, SyncEntity, SyncStatus};

/// Remote field holding a record's display label.
pub fn label_field(kind: RemoteType) -> &'static str {
    match kind {
        RemoteType::Task => "content",
        RemoteType::Project => "name",
        _ => "code",
    }
}

/// Field a local name is derived from.
fn name_field(kind: RemoteType, code_field: &str) -> &str {
    match kind {
        RemoteType::Project => code_field,
        RemoteType::Task => "content",
        _ => "code",
    }
}

/// Slug name of a record, `None` when the naming field is empty.
pub fn record_name(record: &RemoteRecord, code_field: &str) -> Option<String> {
    record
        .str_field(name_field(record.kind, code_field))
        .map(slugify)
        .filter(|name| !name.is_empty())
}

/// Converts a raw remote record into a [`SyncEntity`].
///
/// Folders get the project as provisional parent; callers with a
/// [`HierarchyResolver`](crate::HierarchyResolver) refine it.
pub fn project(
    record: &RemoteRecord,
    code_field: &str,
    mappings: &[AttributeMapping],
) -> SyncResult<SyncEntity> {
    let kind = record
        .kind
        .entity_kind()
        .ok_or_else(|| ModelError::unsupported("hierarchy type", record.kind.as_str()))?;

    let naming = name_field(record.kind, code_field);
    let raw_name = record
        .str_field(naming)
        .ok_or_else(|| ModelError::missing(record.to_string(), naming))?;
    let name = slugify(raw_name);
    if name.is_empty() {
        return Err(ModelError::InvalidValue {
            field: naming.to_string(),
            reason: format!("'{raw_name}' has no slug-safe characters"),
        }
        .into());
    }

    let label = match record.kind {
        RemoteType::Project => record.str_field("name").unwrap_or(raw_name),
        _ => raw_name,
    };

    let mut entity = SyncEntity::new(kind, name, label).with_remote_type(record.kind);
    entity.remote_id = Some(record.id);

    if record.kind == RemoteType::Task {
        let step = record.link_name("step").ok_or_else(|| SyncError::Unclassifiable {
            entity: format!("Task '{label}' (#{})", record.id),
            reason: "no pipeline step".to_string(),
        })?;
        entity.task_type = Some(step.to_string());
    }

    entity.parent = match record.kind {
        RemoteType::Project => None,
        RemoteType::Task | RemoteType::Version => Some(
            record
                .link(ENTITY_FIELD)
                .filter(|parent| parent.kind != RemoteType::Project)
                .map_or(ParentRef::Project, ParentRef::Remote),
        ),
        RemoteType::Asset => Some(
            record
                .str_field(GROUPING_FIELD)
                .map_or(ParentRef::Project, |group| ParentRef::Grouping(group.to_string())),
        ),
        _ => Some(ParentRef::Project),
    };

    for mapping in mappings.iter().filter(|m| m.applies_to(record.kind)) {
        let candidates = field_candidates(&mapping.remote);
        if let Some((_, value)) = record.first_present(&candidates) {
            entity.attributes.insert(mapping.local.clone(), value.clone());
        }
    }

    entity.local_id = record.str_field(LOCAL_ID_FIELD).map(str::to_string);
    entity.sync_status = match entity.local_id {
        None => SyncStatus::Failed,
        Some(_) => record
            .str_field(SYNC_STATUS_FIELD)
            .and_then(|status| status.parse().ok())
            .unwrap_or(SyncStatus::Synced),
    };

    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeType;
    use hubsync_model::{EntityKind, RemoteRef};
    use serde_json::json;

    fn mappings() -> Vec<AttributeMapping> {
        let mut all = AttributeMapping::builtin();
        all.push(AttributeMapping::new("fps", "fps", AttributeType::Float).with_scope([RemoteType::Shot]));
        all
    }

    #[test]
    fn folder_uses_code_for_name_and_label() {
        let record = RemoteRecord::new(RemoteType::Shot, 12)
            .with_field("code", "SH 010")
            .with_field("sg_fps", 24.0)
            .with_field("sg_status_list", "ip");

        let entity = project(&record, "code", &mappings()).unwrap();
        assert_eq!(entity.kind, EntityKind::Folder);
        assert_eq!(entity.name, "SH_010");
        assert_eq!(entity.label, "SH 010");
        assert_eq!(entity.remote_ref(), Some(RemoteRef::new(RemoteType::Shot, 12)));
        assert_eq!(entity.attributes.get("fps"), Some(&json!(24.0)));
        assert_eq!(entity.attributes.get("status"), Some(&json!("ip")));
        assert_eq!(entity.sync_status, SyncStatus::Failed);
    }

    #[test]
    fn task_takes_label_from_content_and_type_from_step() {
        let shot = RemoteRef::new(RemoteType::Shot, 12);
        let record = RemoteRecord::new(RemoteType::Task, 30)
            .with_field("content", "Anim Blocking")
            .with_field("step", json!({"type": "Step", "id": 2, "name": "Animation"}))
            .with_field("entity", shot.to_value())
            .with_field(LOCAL_ID_FIELD, "abc")
            .with_field(SYNC_STATUS_FIELD, "Skipped");

        let entity = project(&record, "code", &mappings()).unwrap();
        assert_eq!(entity.label, "Anim Blocking");
        assert_eq!(entity.name, "Anim_Blocking");
        assert_eq!(entity.task_type.as_deref(), Some("Animation"));
        assert_eq!(entity.parent, Some(ParentRef::Remote(shot)));
        assert_eq!(entity.local_id.as_deref(), Some("abc"));
        assert_eq!(entity.sync_status, SyncStatus::Skipped);
    }

    #[test]
    fn task_without_step_is_unclassifiable() {
        let record = RemoteRecord::new(RemoteType::Task, 30).with_field("content", "anim");
        assert!(matches!(
            project(&record, "code", &[]),
            Err(SyncError::Unclassifiable { .. })
        ));
    }

    #[test]
    fn project_name_comes_from_code_field() {
        let record = RemoteRecord::new(RemoteType::Project, 1)
            .with_field("name", "Big Feature")
            .with_field("sg_code", "bigfeat")
            .with_field(LOCAL_ID_FIELD, "bigfeat");
        let entity = project(&record, "sg_code", &[]).unwrap();
        assert_eq!(entity.name, "bigfeat");
        assert_eq!(entity.label, "Big Feature");
        assert_eq!(entity.parent, None);
        assert_eq!(entity.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn grouped_asset_points_at_grouping() {
        let record = RemoteRecord::new(RemoteType::Asset, 5)
            .with_field("code", "hero")
            .with_field(GROUPING_FIELD, "Character");
        let entity = project(&record, "code", &[]).unwrap();
        assert_eq!(entity.parent, Some(ParentRef::Grouping("Character".into())));
    }

    #[test]
    fn unmapped_and_out_of_scope_fields_are_ignored() {
        let record = RemoteRecord::new(RemoteType::Sequence, 3)
            .with_field("code", "sq01")
            .with_field("sg_fps", 24.0)
            .with_field("description", "x");
        let entity = project(&record, "code", &mappings()).unwrap();
        assert!(entity.attributes.is_empty());
    }

    #[test]
    fn missing_code_is_an_input_error() {
        let record = RemoteRecord::new(RemoteType::Shot, 3);
        assert!(matches!(
            project(&record, "code", &[]),
            Err(SyncError::Model(ModelError::MissingField { .. }))
        ));
        assert_eq!(record_name(&record, "code"), None);
    }
}
