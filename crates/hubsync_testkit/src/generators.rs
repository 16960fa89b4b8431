//! Property-based test generators using proptest.
//!
//! Strategies produce whole hierarchies rather than single entities, so
//! tests can check tree-level invariants of synchronization passes.

use crate::fixtures::{TestStudio, STEPS};
use hubsync_engine::LocalEntity;
use hubsync_model::RemoteRecord;
use proptest::prelude::*;
use std::collections::HashSet;

/// Strategy for folder names as artists type them.
pub fn folder_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{2,4}[0-9]{2,3}").expect("Invalid regex")
}

/// Strategy for free-form labels with mixed case, spaces and punctuation.
pub fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 _-]{0,15}")
        .expect("Invalid regex")
        .prop_filter("Label must contain an alphanumeric", |s| {
            s.chars().any(char::is_alphanumeric)
        })
}

/// A sequence with its shots; every shot carries tasks by step index.
#[derive(Debug, Clone)]
pub struct SequencePlan {
    /// Sequence name.
    pub name: String,
    /// Shot names, each with step indices into [`STEPS`].
    pub shots: Vec<(String, Vec<usize>)>,
}

/// A local sequence/shot/task hierarchy.
#[derive(Debug, Clone)]
pub struct LocalPlan {
    /// Sequences in creation order.
    pub sequences: Vec<SequencePlan>,
}

impl LocalPlan {
    /// Number of entities the plan materializes.
    pub fn entity_count(&self) -> usize {
        self.sequences
            .iter()
            .map(|sq| 1 + sq.shots.iter().map(|(_, tasks)| 1 + tasks.len()).sum::<usize>())
            .sum()
    }

    /// Local entities, parents first, with positional ids.
    pub fn entities(&self) -> Vec<LocalEntity> {
        let mut out = Vec::with_capacity(self.entity_count());
        for (i, sq) in self.sequences.iter().enumerate() {
            let sq_id = format!("sq{i}");
            out.push(LocalEntity::folder(sq_id.as_str(), None, "Sequence", &sq.name));
            for (j, (shot, tasks)) in sq.shots.iter().enumerate() {
                let sh_id = format!("sh{i}-{j}");
                out.push(LocalEntity::folder(sh_id.as_str(), Some(sq_id.as_str()), "Shot", shot));
                for (k, step) in tasks.iter().enumerate() {
                    let task_type = STEPS[*step];
                    out.push(LocalEntity::task(
                        format!("tk{i}-{j}-{k}"),
                        Some(sh_id.as_str()),
                        task_type,
                        &task_type.to_lowercase(),
                    ));
                }
            }
        }
        out
    }

    /// Adds every entity to the studio's hub.
    pub fn apply(&self, studio: &TestStudio) {
        for entity in self.entities() {
            studio.add_local(entity);
        }
    }
}

/// Strategy for local hierarchies with unique sibling names.
///
/// Each shot carries at most one task per step.
pub fn local_plan_strategy(max_sequences: usize, max_shots: usize) -> impl Strategy<Value = LocalPlan> {
    let shot = (
        folder_name_strategy(),
        prop::sample::subsequence((0..STEPS.len()).collect::<Vec<_>>(), 0..=STEPS.len()),
    );
    let sequence = (
        folder_name_strategy(),
        prop::collection::vec(shot, 0..=max_shots),
    )
        .prop_map(|(name, shots)| {
            let mut seen = HashSet::new();
            let shots = shots
                .into_iter()
                .filter(|(shot, _)| seen.insert(shot.clone()))
                .collect();
            SequencePlan { name, shots }
        });
    prop::collection::vec(sequence, 1..=max_sequences).prop_map(|sequences| {
        let mut seen = HashSet::new();
        let sequences = sequences
            .into_iter()
            .filter(|s| seen.insert(s.name.clone()))
            .collect();
        LocalPlan { sequences }
    })
}

/// A remote asset library filed under categories.
#[derive(Debug, Clone)]
pub struct LibraryPlan {
    /// `(asset code, category label)` pairs.
    pub assets: Vec<(String, String)>,
}

impl LibraryPlan {
    /// Inserts the assets remotely.
    pub fn apply(&self, studio: &TestStudio) -> Vec<RemoteRecord> {
        self.assets
            .iter()
            .map(|(code, category)| studio.add_remote_asset(code, category))
            .collect()
    }
}

/// Strategy for asset libraries whose category labels vary in case and
/// surrounding whitespace.
pub fn library_plan_strategy(max_assets: usize) -> impl Strategy<Value = LibraryPlan> {
    let category = (
        prop::sample::select(vec!["Character", "Prop", "Environment", "FX"]),
        prop::sample::select(vec![0u8, 1, 2]),
    )
        .prop_map(|(base, variant)| match variant {
            0 => base.to_string(),
            1 => base.to_lowercase(),
            _ => format!(" {} ", base.to_uppercase()),
        });
    prop::collection::vec((folder_name_strategy(), category), 1..=max_assets).prop_map(|pairs| {
        let mut seen = HashSet::new();
        let assets = pairs
            .into_iter()
            .filter(|(code, _)| seen.insert(code.clone()))
            .collect();
        LibraryPlan { assets }
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn plans_list_parents_first(plan in local_plan_strategy(3, 4)) {
            let entities = plan.entities();
            prop_assert_eq!(entities.len(), plan.entity_count());
            let mut seen = HashSet::new();
            for entity in &entities {
                if let Some(parent) = &entity.parent_id {
                    prop_assert!(seen.contains(parent));
                }
                prop_assert!(seen.insert(entity.id.clone()));
            }
        }

        #[test]
        fn sibling_names_are_unique(plan in local_plan_strategy(4, 4)) {
            let names: HashSet<_> = plan.sequences.iter().map(|s| &s.name).collect();
            prop_assert_eq!(names.len(), plan.sequences.len());
            for sq in &plan.sequences {
                let shots: HashSet<_> = sq.shots.iter().map(|(n, _)| n).collect();
                prop_assert_eq!(shots.len(), sq.shots.len());
            }
        }

        #[test]
        fn labels_are_printable(label in label_strategy()) {
            prop_assert!(!label.trim().is_empty());
        }
    }
}
