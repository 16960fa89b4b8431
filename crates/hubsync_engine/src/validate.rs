//! Dry checks of a deployment: attribute map and per-project readiness.

use crate::client::{LocalHub, RemoteClient};
use crate::config::SyncConfig;
use crate::context::RunContext;
use crate::error::{SyncError, SyncResult};
use crate::hierarchy::HierarchyResolver;
use crate::local::{LocalEntity, LocalTree};
use crate::schema::SchemaCache;
use hubsync_model::{FieldDataType, RemoteType};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;

/// A problem found by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Two mappings claim the same local attribute or remote field for a type.
    DuplicateMapping {
        /// Attribute or field name.
        name: String,
        /// Remote type both mappings apply to.
        kind: RemoteType,
    },
    /// No field exists under the bare or prefixed name.
    MissingField {
        /// Remote type.
        kind: RemoteType,
        /// Field name as configured.
        field: String,
    },
    /// The field exists but the API refuses writes.
    ReadOnlyField {
        /// Remote type.
        kind: RemoteType,
        /// Resolved field name.
        field: String,
    },
    /// The field cannot hold the configured value type.
    TypeMismatch {
        /// Remote type.
        kind: RemoteType,
        /// Resolved field name.
        field: String,
        /// Remote data type.
        data_type: FieldDataType,
    },
    /// Local folders of an enabled type the remote project does not show.
    HiddenType {
        /// Remote type.
        kind: RemoteType,
    },
    /// A run would fail before doing any work.
    Precondition {
        /// Reason.
        reason: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::DuplicateMapping { name, kind } => {
                write!(f, "{kind}: '{name}' is mapped more than once")
            }
            ValidationIssue::MissingField { kind, field } => {
                write!(f, "{kind}: field '{field}' does not exist")
            }
            ValidationIssue::ReadOnlyField { kind, field } => {
                write!(f, "{kind}: field '{field}' is not editable")
            }
            ValidationIssue::TypeMismatch { kind, field, data_type } => {
                write!(f, "{kind}: field '{field}' of type {data_type:?} does not fit the mapping")
            }
            ValidationIssue::HiddenType { kind } => {
                write!(f, "{kind} is used locally but hidden in the remote project")
            }
            ValidationIssue::Precondition { reason } => f.write_str(reason),
        }
    }
}

/// Checks the custom attribute map against the remote schema.
///
/// Every enabled type a mapping applies to, the project included, must carry
/// an editable field of a fitting type.
pub fn validate_attribute_map<R: RemoteClient + ?Sized>(
    remote: &R,
    config: &SyncConfig,
) -> SyncResult<Vec<ValidationIssue>> {
    let mut cache = SchemaCache::new();
    let mut issues = Vec::new();

    let mut kinds = vec![RemoteType::Project];
    kinds.extend(config.enabled_entities.iter().copied());

    for kind in kinds {
        let mut locals = HashSet::new();
        let mut remotes = HashSet::new();
        for mapping in config.attribute_mappings().iter().filter(|m| m.applies_to(kind)) {
            if !locals.insert(mapping.local.clone()) {
                issues.push(ValidationIssue::DuplicateMapping {
                    name: mapping.local.clone(),
                    kind,
                });
            }
            if !remotes.insert(mapping.remote.clone()) {
                issues.push(ValidationIssue::DuplicateMapping {
                    name: mapping.remote.clone(),
                    kind,
                });
            }
        }

        for mapping in config.attribute_map.iter().filter(|m| m.applies_to(kind)) {
            let Some(schema) = cache.resolve(remote, kind, &mapping.remote)? else {
                issues.push(ValidationIssue::MissingField {
                    kind,
                    field: mapping.remote.clone(),
                });
                continue;
            };
            if !schema.editable {
                issues.push(ValidationIssue::ReadOnlyField {
                    kind,
                    field: schema.name.clone(),
                });
            }
            if !mapping.value_type.fits(schema.data_type) {
                issues.push(ValidationIssue::TypeMismatch {
                    kind,
                    field: schema.name,
                    data_type: schema.data_type,
                });
            }
        }
    }
    Ok(issues)
}

/// Checks that a project could be synchronized right now.
///
/// Precondition failures are reported as issues; transport failures are
/// returned as errors.
pub fn validate_project<R, L>(
    remote: &R,
    hub: &L,
    config: &SyncConfig,
    project: &str,
) -> SyncResult<Vec<ValidationIssue>>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let never = AtomicBool::new(false);
    let ctx = match RunContext::open(remote, hub, config, project, &never) {
        Ok(ctx) => ctx,
        Err(SyncError::Precondition(reason)) => {
            return Ok(vec![ValidationIssue::Precondition { reason }]);
        }
        Err(e) => return Err(e),
    };

    let mut issues: Vec<ValidationIssue> = hidden_folder_types(&ctx.local, config, &ctx.resolver)
        .into_iter()
        .map(|kind| ValidationIssue::HiddenType { kind })
        .collect();
    if !ctx.auto_sync_enabled() {
        issues.push(ValidationIssue::Precondition {
            reason: format!("automatic synchronization is off for '{project}'"),
        });
    }
    Ok(issues)
}

/// Enabled folder types used by local entities but not visible remotely.
pub(crate) fn hidden_folder_types(
    local: &LocalTree,
    config: &SyncConfig,
    resolver: &HierarchyResolver,
) -> Vec<RemoteType> {
    let mut hidden: Vec<RemoteType> = local
        .entities()
        .filter_map(LocalEntity::remote_type)
        .filter(|kind| kind.is_folder() && config.is_enabled(*kind) && !resolver.is_visible(*kind))
        .collect();
    hidden.sort_by_key(|kind| kind.as_str());
    hidden.dedup();
    hidden
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeMapping, AttributeType};
    use crate::memory_remote::MemoryRemote;
    use hubsync_model::FieldSchema;

    fn remote() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.add_field(RemoteType::Shot, FieldSchema::new("sg_fps", FieldDataType::Float));
        remote.add_field(RemoteType::Shot, FieldSchema::new("sg_notes", FieldDataType::Text).read_only());
        remote.add_field(RemoteType::Shot, FieldSchema::new("sg_frame_start", FieldDataType::Text));
        remote
    }

    fn config(mappings: Vec<AttributeMapping>) -> SyncConfig {
        let mut config = SyncConfig::default().with_enabled_entities([RemoteType::Shot]);
        for mapping in mappings {
            config = config.with_attribute(mapping.with_scope([RemoteType::Shot]));
        }
        config
    }

    #[test]
    fn prefixed_fields_satisfy_mappings() {
        let config = config(vec![AttributeMapping::new("fps", "fps", AttributeType::Float)]);
        assert!(validate_attribute_map(&remote(), &config).unwrap().is_empty());
    }

    #[test]
    fn problems_are_reported_per_field() {
        let config = config(vec![
            AttributeMapping::new("notes", "notes", AttributeType::Text),
            AttributeMapping::new("frameStart", "frame_start", AttributeType::Integer),
            AttributeMapping::new("clipIn", "clip_in", AttributeType::Integer),
            AttributeMapping::new("fps", "fps", AttributeType::Float),
            AttributeMapping::new("fps", "fps", AttributeType::Float),
        ]);
        let issues = validate_attribute_map(&remote(), &config).unwrap();
        assert!(issues.contains(&ValidationIssue::ReadOnlyField {
            kind: RemoteType::Shot,
            field: "sg_notes".into(),
        }));
        assert!(issues.contains(&ValidationIssue::TypeMismatch {
            kind: RemoteType::Shot,
            field: "sg_frame_start".into(),
            data_type: FieldDataType::Text,
        }));
        assert!(issues.contains(&ValidationIssue::MissingField {
            kind: RemoteType::Shot,
            field: "clip_in".into(),
        }));
        assert!(issues.contains(&ValidationIssue::DuplicateMapping {
            name: "fps".into(),
            kind: RemoteType::Shot,
        }));
    }

    #[test]
    fn missing_projects_are_preconditions() {
        let hub = crate::memory_hub::MemoryHub::new();
        let issues = validate_project(&remote(), &hub, &SyncConfig::default(), "demo").unwrap();
        assert!(matches!(issues.as_slice(), [ValidationIssue::Precondition { .. }]));
        assert!(issues[0].to_string().contains("does not exist"));
    }
}
