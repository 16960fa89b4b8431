//! Cross-side consistency checks.
//!
//! Assertions over a [`TestStudio`] after one or more passes: both sides
//! agree on links, no entity is orphaned, and repeated passes are inert.

use crate::fixtures::{TestStudio, TEST_PROJECT};
use hubsync_engine::{Direction, LocalEntity, OutcomeKind, SyncReport};
use hubsync_model::fields::LOCAL_ID_FIELD;
use hubsync_model::slug_key;
use std::collections::{HashMap, HashSet};

/// Asserts that every linked local entity and its remote record point at each other.
pub fn assert_links_consistent(studio: &TestStudio) {
    let mut claimed = HashMap::new();
    for entity in studio.locals() {
        let Some(target) = entity.remote_ref() else {
            continue;
        };
        if let Some(other) = claimed.insert(target, entity.id.clone()) {
            panic!("{target} is claimed by both '{other}' and '{}'", entity.id);
        }
        let record = studio
            .remote()
            .record(target)
            .unwrap_or_else(|| panic!("{} links to missing {target}", entity.describe()));
        assert_eq!(
            record.str_field(LOCAL_ID_FIELD),
            Some(entity.id.as_str()),
            "{target} does not point back at {}",
            entity.describe()
        );
    }
}

/// Asserts that every local parent exists in the project.
pub fn assert_no_orphans(studio: &TestStudio) {
    let entities = studio.locals();
    let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    for entity in &entities {
        if let Some(parent) = &entity.parent_id {
            assert!(
                ids.contains(parent.as_str()),
                "{} hangs off missing parent '{parent}'",
                entity.describe()
            );
        }
    }
}

/// Asserts that no two siblings share a slugged name.
pub fn assert_unique_siblings(studio: &TestStudio) {
    let mut seen = HashSet::new();
    for entity in studio.locals() {
        let key = (entity.parent_id.clone(), entity.kind, slug_key(&entity.name));
        assert!(seen.insert(key), "duplicate sibling {}", entity.describe());
    }
}

/// Runs a pass expected to change nothing on either side and returns it.
pub fn assert_idempotent(studio: &TestStudio, direction: Direction) -> SyncReport {
    let entities = studio.locals().len();
    studio.remote().reset_counters();

    let report = studio.run(direction);
    assert!(report.is_synced(), "repeated {direction} pass is not synced:\n{report}");
    for kind in [OutcomeKind::Created, OutcomeKind::Deleted, OutcomeKind::Failed] {
        assert_eq!(
            report.count(kind),
            0,
            "repeated {direction} pass has {} outcomes:\n{report}",
            kind.as_str()
        );
    }
    let counters = studio.remote().counters();
    assert_eq!(counters.creates, 0, "repeated {direction} pass created remote records");
    assert_eq!(counters.deletes, 0, "repeated {direction} pass deleted remote records");
    assert_eq!(studio.locals().len(), entities, "repeated {direction} pass changed the hierarchy");
    report
}

/// Asserts the whole set of cross-side invariants.
pub fn assert_consistent(studio: &TestStudio) {
    assert_links_consistent(studio);
    assert_no_orphans(studio);
    assert_unique_siblings(studio);
}

/// Local entities keyed by their slugged path from the project root.
pub fn local_paths(studio: &TestStudio) -> HashMap<String, LocalEntity> {
    let entities = studio.hub().entities(TEST_PROJECT);
    let by_id: HashMap<&str, &LocalEntity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut paths = HashMap::new();
    for entity in &entities {
        let mut segments = vec![slug_key(&entity.name)];
        let mut cursor = entity.parent_id.as_deref();
        while let Some(id) = cursor {
            let Some(parent) = by_id.get(id) else {
                break;
            };
            segments.push(slug_key(&parent.name));
            cursor = parent.parent_id.as_deref();
        }
        segments.reverse();
        paths.insert(segments.join("/"), entity.clone());
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios;
    use hubsync_model::RemoteType;

    #[test]
    fn pushed_episode_is_consistent() {
        let studio = TestStudio::new();
        scenarios::local_episode(&studio, 2, 3);
        assert!(studio.push().is_synced());
        assert_consistent(&studio);
        assert_idempotent(&studio, Direction::LocalToRemote);
    }

    #[test]
    fn pulled_library_is_consistent() {
        let studio = TestStudio::new();
        scenarios::remote_library(&studio, &["Character", "Prop"], 3);
        assert!(studio.pull().is_synced());
        assert_consistent(&studio);
        assert_idempotent(&studio, Direction::RemoteToLocal);

        let paths = local_paths(&studio);
        assert!(paths.contains_key("character/character_00"));
        assert!(paths.contains_key("prop/prop_02"));
    }

    #[test]
    #[should_panic(expected = "does not point back")]
    fn broken_back_references_are_caught() {
        let studio = TestStudio::new();
        let shot = studio.add_remote(RemoteType::Shot, "sh010", None);
        assert!(studio.pull().is_synced());
        studio.remote().patch(
            shot.to_ref(),
            crate::fixtures::fields(&[(LOCAL_ID_FIELD, serde_json::json!("someone-else"))]),
        );
        assert_links_consistent(&studio);
    }
}
