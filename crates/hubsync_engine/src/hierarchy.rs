//! Parent-field resolution for remote types.

use hubsync_model::fields::{ENTITY_FIELD, FLAT_CHAIN, GROUPING_FIELD, PROJECT_FIELD};
use hubsync_model::{ParentRef, RemoteRecord, RemoteType, TrackingSettings};

/// Resolves which field of a remote record points at its structural parent.
///
/// Built once per run from the project's tracking settings and the types
/// enabled in configuration.
#[derive(Debug, Clone)]
pub struct HierarchyResolver {
    settings: TrackingSettings,
    enabled: Vec<RemoteType>,
}

impl HierarchyResolver {
    /// Creates a resolver.
    pub fn new(settings: TrackingSettings, enabled: impl IntoIterator<Item = RemoteType>) -> Self {
        Self {
            settings,
            enabled: enabled.into_iter().collect(),
        }
    }

    /// The tracking settings in use.
    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Returns true if the project shows the type. Versions are always shown.
    pub fn is_visible(&self, kind: RemoteType) -> bool {
        kind == RemoteType::Version || self.settings.visible.contains(&kind)
    }

    /// Returns true if the type is both configured and shown by the project.
    pub fn is_enabled(&self, kind: RemoteType) -> bool {
        self.enabled.contains(&kind) && self.is_visible(kind)
    }

    /// Field of `kind` records that links to their parent.
    ///
    /// Tasks and versions hang off `entity`. Types the project does not show,
    /// flat chains and missing chains resolve to `project`. A multi-hop chain
    /// is reduced to its first hop.
    pub fn parent_field_for(&self, kind: RemoteType) -> String {
        match kind {
            RemoteType::Task | RemoteType::Version => return ENTITY_FIELD.to_string(),
            RemoteType::Project => return PROJECT_FIELD.to_string(),
            _ => {}
        }
        if !self.is_visible(kind) {
            return PROJECT_FIELD.to_string();
        }
        let Some(chain) = self.settings.navchains.get(kind.as_str()) else {
            return PROJECT_FIELD.to_string();
        };
        let hop = chain.split(',').next().unwrap_or_default().trim();
        if hop.is_empty() || hop == FLAT_CHAIN {
            return PROJECT_FIELD.to_string();
        }
        let type_prefix = format!("{}.", kind.as_str());
        hop.strip_prefix(&type_prefix).unwrap_or(hop).to_string()
    }

    /// Structural parent of a record.
    ///
    /// Assets carrying a discriminator are grouped under it. Links to the
    /// project, and records without a parent link, hang off the project root.
    pub fn parent_of(&self, record: &RemoteRecord) -> ParentRef {
        if record.kind == RemoteType::Asset {
            if let Some(group) = record.str_field(GROUPING_FIELD) {
                return ParentRef::Grouping(group.to_string());
            }
        }
        let field = self.parent_field_for(record.kind);
        if field == PROJECT_FIELD {
            return ParentRef::Project;
        }
        match record.link(&field) {
            Some(parent) if parent.kind != RemoteType::Project => ParentRef::Remote(parent),
            _ => ParentRef::Project,
        }
    }

    /// Enabled types that form the tree, parents' types first.
    ///
    /// Folder types come in hierarchy order followed by tasks. Versions are
    /// leaves handled by the publishing side and are not walked.
    pub fn tree_types(&self) -> Vec<RemoteType> {
        RemoteType::FOLDERS
            .into_iter()
            .chain([RemoteType::Task])
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_model::RemoteRef;

    fn resolver() -> HierarchyResolver {
        let mut settings = TrackingSettings::default();
        settings
            .navchains
            .insert("Shot".into(), "Shot.sg_sequence, Sequence.episode".into());
        settings.navchains.insert("Sequence".into(), "Sequence.episode".into());
        settings.navchains.insert("Asset".into(), FLAT_CHAIN.into());
        settings.visible.extend([
            RemoteType::Episode,
            RemoteType::Sequence,
            RemoteType::Shot,
            RemoteType::Asset,
            RemoteType::Task,
        ]);
        HierarchyResolver::new(
            settings,
            [
                RemoteType::Episode,
                RemoteType::Sequence,
                RemoteType::Shot,
                RemoteType::Asset,
                RemoteType::Task,
                RemoteType::Version,
            ],
        )
    }

    #[test]
    fn multi_hop_chain_uses_first_hop() {
        assert_eq!(resolver().parent_field_for(RemoteType::Shot), "sg_sequence");
        assert_eq!(resolver().parent_field_for(RemoteType::Sequence), "episode");
    }

    #[test]
    fn flat_missing_and_hidden_resolve_to_project() {
        let r = resolver();
        assert_eq!(r.parent_field_for(RemoteType::Asset), "project");
        assert_eq!(r.parent_field_for(RemoteType::Episode), "project");
        assert_eq!(r.parent_field_for(RemoteType::Scene), "project");
    }

    #[test]
    fn tasks_and_versions_hang_off_entity() {
        let r = resolver();
        assert_eq!(r.parent_field_for(RemoteType::Task), "entity");
        assert_eq!(r.parent_field_for(RemoteType::Version), "entity");
    }

    #[test]
    fn parent_of_follows_the_chain() {
        let r = resolver();
        let seq = RemoteRef::new(RemoteType::Sequence, 3);
        let shot = RemoteRecord::new(RemoteType::Shot, 4).with_field("sg_sequence", seq.to_value());
        assert_eq!(r.parent_of(&shot), ParentRef::Remote(seq));

        let orphan = RemoteRecord::new(RemoteType::Shot, 5);
        assert_eq!(r.parent_of(&orphan), ParentRef::Project);

        let prop = RemoteRecord::new(RemoteType::Asset, 6).with_field(GROUPING_FIELD, "Prop");
        assert_eq!(r.parent_of(&prop), ParentRef::Grouping("Prop".into()));

        let task = RemoteRecord::new(RemoteType::Task, 7)
            .with_field("entity", RemoteRef::new(RemoteType::Project, 1).to_value());
        assert_eq!(r.parent_of(&task), ParentRef::Project);
    }

    #[test]
    fn tree_types_follow_hierarchy_order() {
        assert_eq!(
            resolver().tree_types(),
            vec![
                RemoteType::Episode,
                RemoteType::Sequence,
                RemoteType::Shot,
                RemoteType::Asset,
                RemoteType::Task,
            ]
        );
    }

    #[test]
    fn hidden_types_are_disabled() {
        let r = resolver();
        assert!(!r.is_enabled(RemoteType::Scene));
        assert!(r.is_enabled(RemoteType::Version));
    }
}
