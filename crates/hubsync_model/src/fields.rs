//! Field and attribute names shared by both sides.
//!
//! Cross-references live on the entities themselves: the remote record carries
//! the local id and a status marker in custom fields, the local entity carries
//! the remote id and type in attributes.

/// Remote custom field holding the local entity id.
pub const LOCAL_ID_FIELD: &str = "sg_hub_id";

/// Remote custom field holding the [`SyncStatus`](crate::SyncStatus).
pub const SYNC_STATUS_FIELD: &str = "sg_hub_sync_status";

/// Remote project checkbox gating event-driven synchronization.
pub const AUTO_SYNC_FIELD: &str = "sg_hub_auto_sync";

/// Prefix the remote service puts on custom (non built-in) fields.
pub const CUSTOM_PREFIX: &str = "sg_";

/// Local attribute holding the remote id.
pub const REMOTE_ID_ATTRIB: &str = "remoteId";

/// Local attribute holding the remote type name.
pub const REMOTE_TYPE_ATTRIB: &str = "remoteType";

/// Local project attribute gating event-driven pushes to the remote side.
pub const PUSH_ATTRIB: &str = "remotePush";

/// Cross-reference sentinel for entities retired on the other side but kept
/// because their position in the hierarchy is load-bearing.
pub const REMOVED: &str = "removed";

/// Remote type name recorded on local grouping folders.
pub const GROUPING_TYPE: &str = "AssetCategory";

/// Remote field whose value groups assets under a synthesized folder.
pub const GROUPING_FIELD: &str = "sg_asset_type";

/// Local folder type used for grouping folders.
pub const GROUPING_FOLDER_TYPE: &str = "Folder";

/// Link from any remote record to its project.
pub const PROJECT_FIELD: &str = "project";

/// Generic parent link used by tasks and versions.
pub const ENTITY_FIELD: &str = "entity";

/// Navigation chain value meaning "parented directly to the project".
pub const FLAT_CHAIN: &str = "__flat__";

/// Remote field carrying the retirement timestamp.
pub const RETIREMENT_FIELD: &str = "retirement_date";

/// Returns the reserved-prefix variant of a field name.
///
/// Names that already carry the prefix are returned unchanged.
pub fn prefixed(name: &str) -> String {
    if name.starts_with(CUSTOM_PREFIX) {
        name.to_string()
    } else {
        format!("{CUSTOM_PREFIX}{name}")
    }
}

/// Candidate remote field names for a mapped attribute, bare name first.
pub fn field_candidates(name: &str) -> Vec<String> {
    let with_prefix = prefixed(name);
    if with_prefix == name {
        vec![with_prefix]
    } else {
        vec![name.to_string(), with_prefix]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_not_doubled() {
        assert_eq!(prefixed("status_list"), "sg_status_list");
        assert_eq!(prefixed("sg_status_list"), "sg_status_list");
    }

    #[test]
    fn candidates_try_bare_name_first() {
        assert_eq!(field_candidates("tags"), vec!["tags", "sg_tags"]);
        assert_eq!(field_candidates("sg_cut_in"), vec!["sg_cut_in"]);
    }
}
