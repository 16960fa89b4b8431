//! Tree-level properties of synchronization passes.

use hubsync_engine::{LocalEntity, OutcomeKind};
use hubsync_model::fields::GROUPING_FOLDER_TYPE;
use hubsync_model::{slug_key, RemoteType};
use hubsync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn groupings(studio: &TestStudio) -> Vec<LocalEntity> {
    studio.locals().into_iter().filter(LocalEntity::is_grouping).collect()
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn pushes_mirror_the_tree_once(plan in local_plan_strategy(3, 3)) {
        let studio = TestStudio::new();
        plan.apply(&studio);

        let report = studio.push();
        prop_assert!(report.is_synced(), "{}", report);
        prop_assert_eq!(report.count(OutcomeKind::Created), plan.entity_count());
        prop_assert_eq!(studio.remote_tree().len(), plan.entity_count());
        assert_consistent(&studio);

        assert_idempotent(&studio, Direction::LocalToRemote);
    }

    #[test]
    fn pulls_rebuild_pushed_trees(plan in local_plan_strategy(2, 3)) {
        let source = TestStudio::new();
        plan.apply(&source);
        prop_assert!(source.push().is_synced());

        // Pull into a second hub over the same remote state.
        let mirror = TestStudio::new();
        let hub_side = hubsync_engine::SyncEngine::with_shared(
            mirror.engine.config().clone(),
            source.engine.remote().clone(),
            mirror.engine.hub().clone(),
        );
        let report = hub_side
            .synchronize_project(TEST_PROJECT, Direction::RemoteToLocal)
            .unwrap();
        prop_assert!(report.is_synced(), "{}", report);

        let expected: BTreeSet<String> = local_paths(&source).into_keys().collect();
        let actual: BTreeSet<String> = local_paths(&mirror).into_keys().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn categories_collapse_by_slug(library in library_plan_strategy(12)) {
        let studio = TestStudio::new();
        library.apply(&studio);

        let report = studio.pull();
        prop_assert!(report.is_synced(), "{}", report);
        assert_consistent(&studio);

        let expected: BTreeSet<String> = library.assets.iter().map(|(_, c)| slug_key(c)).collect();
        let folders = groupings(&studio);
        let names: BTreeSet<String> = folders.iter().map(|g| g.name.clone()).collect();
        prop_assert_eq!(names, expected);
        for folder in &folders {
            prop_assert_eq!(folder.folder_type.as_deref(), Some(GROUPING_FOLDER_TYPE));
            prop_assert!(folder.parent_id.is_none());
        }

        // A second pull reuses the same grouping folders.
        let before: BTreeSet<String> = folders.into_iter().map(|g| g.id).collect();
        assert_idempotent(&studio, Direction::RemoteToLocal);
        let after: BTreeSet<String> = groupings(&studio).into_iter().map(|g| g.id).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn skipped_parents_do_not_orphan_children(plan in local_plan_strategy(2, 3)) {
        let studio = TestStudio::builder()
            .enabled([RemoteType::Shot, RemoteType::Task])
            .build();
        plan.apply(&studio);

        let report = studio.push();
        prop_assert!(report.is_synced(), "{}", report);
        prop_assert_eq!(report.count(OutcomeKind::Skipped), plan.sequences.len());

        for entity in studio.locals() {
            let linked = entity.remote_ref().is_some();
            prop_assert_eq!(linked, entity.folder_type.as_deref() != Some("Sequence"));
        }
        for record in studio.remote().records(RemoteType::Shot) {
            prop_assert!(record.link("sg_sequence").is_none());
        }
    }

    #[test]
    fn pulls_bridge_unsynchronized_levels(plan in local_plan_strategy(2, 3)) {
        let studio = TestStudio::builder()
            .enabled([RemoteType::Episode, RemoteType::Shot, RemoteType::Task])
            .visible([RemoteType::Sequence])
            .navchain(RemoteType::Sequence, "Sequence.episode")
            .build();
        let episode = studio.add_remote(RemoteType::Episode, "ep01", None);
        let mut shots = Vec::new();
        for sq in &plan.sequences {
            let sequence = studio.add_remote(RemoteType::Sequence, &sq.name, Some(("episode", episode.to_ref())));
            for (shot, _) in &sq.shots {
                let code = format!("{}_{shot}", sq.name);
                shots.push(studio.add_remote(RemoteType::Shot, &code, Some(("sg_sequence", sequence.to_ref()))));
            }
        }

        let report = studio.pull();
        prop_assert!(report.is_synced(), "{}", report);
        assert_consistent(&studio);

        let root = studio.counterpart(episode.to_ref()).unwrap();
        for shot in &shots {
            let local = studio.counterpart(shot.to_ref()).unwrap();
            prop_assert_eq!(local.parent_id.as_deref(), Some(root.id.as_str()));
        }
        assert_idempotent(&studio, Direction::RemoteToLocal);
    }

    #[test]
    fn relabels_reach_the_remote_code(plan in local_plan_strategy(1, 2), label in label_strategy()) {
        let studio = TestStudio::new();
        plan.apply(&studio);
        prop_assert!(studio.push().is_synced());

        let sequence = studio.local("sq0").unwrap().with_label(&label);
        studio.add_local(sequence.clone());
        let event = hubsync_model::Notification::from_topic(
            "entity.folder.label_changed",
            serde_json::json!({"project": TEST_PROJECT, "entityId": sequence.id, "newValue": label}),
        )
        .unwrap();
        let reaction = studio.engine.react_to_change(&event).unwrap();
        prop_assert!(reaction.is_committed(), "{:?}", reaction);

        let target = sequence.remote_ref().unwrap();
        let record = studio.remote().record(target).unwrap();
        prop_assert_eq!(record.str_field("code"), Some(label.as_str()));
    }
}
