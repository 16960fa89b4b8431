//! Per-entity outcomes and the project-level status of a run.

use hubsync_model::{RemoteRef, SyncStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Created on the destination side.
    Created,
    /// Existing counterpart updated.
    Updated,
    /// Counterpart already up to date.
    Unchanged,
    /// Counterpart deleted.
    Deleted,
    /// Deliberately not processed.
    Skipped,
    /// Processing failed.
    Failed,
}

impl OutcomeKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::Unchanged => "unchanged",
            OutcomeKind::Deleted => "deleted",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Outcome for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    /// Human-readable entity description.
    pub entity: String,
    /// What happened.
    pub kind: OutcomeKind,
    /// Local id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    /// Remote counterpart, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRef>,
    /// Why the entity was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EntityOutcome {
    /// Creates an outcome.
    pub fn new(kind: OutcomeKind, entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind,
            local_id: None,
            remote: None,
            reason: None,
        }
    }

    /// Sets the local id.
    pub fn with_local(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    /// Sets the remote counterpart.
    pub fn with_remote(mut self, remote: RemoteRef) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of a run or a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Project name.
    pub project: String,
    /// Project-level status: `Failed` as soon as anything failed.
    pub status: SyncStatus,
    /// Outcomes in processing order.
    pub outcomes: Vec<EntityOutcome>,
    /// Project-level problems that did not belong to a single entity outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl SyncReport {
    /// Creates an empty, synced report.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            status: SyncStatus::Synced,
            outcomes: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Records an outcome. A failure downgrades the project status.
    pub fn record(&mut self, outcome: EntityOutcome) {
        if outcome.kind == OutcomeKind::Failed {
            self.status = SyncStatus::Failed;
        }
        self.outcomes.push(outcome);
    }

    /// Downgrades the project status for a problem not tied to one outcome.
    pub fn downgrade(&mut self, problem: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.problems.push(problem.into());
    }

    /// Number of outcomes of a kind.
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    /// Outcomes that did not end synced.
    pub fn non_synced(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.kind, OutcomeKind::Skipped | OutcomeKind::Failed))
    }

    /// True when the project status is `Synced`.
    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "project '{}': {} ({} created, {} updated, {} unchanged, {} deleted, {} skipped, {} failed)",
            self.project,
            self.status,
            self.count(OutcomeKind::Created),
            self.count(OutcomeKind::Updated),
            self.count(OutcomeKind::Unchanged),
            self.count(OutcomeKind::Deleted),
            self.count(OutcomeKind::Skipped),
            self.count(OutcomeKind::Failed),
        )?;
        for outcome in self.non_synced() {
            write!(f, "  {:<8} {}", outcome.kind.as_str(), outcome.entity)?;
            if let Some(reason) = &outcome.reason {
                write!(f, ": {reason}")?;
            }
            writeln!(f)?;
        }
        for problem in &self.problems {
            writeln!(f, "  problem  {problem}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_downgrades_status() {
        let mut report = SyncReport::new("demo");
        report.record(EntityOutcome::new(OutcomeKind::Created, "Shot 'sh010'"));
        assert!(report.is_synced());
        report.record(EntityOutcome::new(OutcomeKind::Skipped, "Folder 'misc'").with_reason("no remote type"));
        assert!(report.is_synced());
        report.record(EntityOutcome::new(OutcomeKind::Failed, "Task 'anim'").with_reason("no pipeline step"));
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.non_synced().count(), 2);
    }

    #[test]
    fn display_lists_non_synced_entities() {
        let mut report = SyncReport::new("demo");
        report.record(EntityOutcome::new(OutcomeKind::Created, "Shot 'sh010'"));
        report.record(EntityOutcome::new(OutcomeKind::Failed, "Task 'anim'").with_reason("no pipeline step"));
        report.downgrade("could not write back Shot#3");

        let text = report.to_string();
        assert!(text.starts_with("project 'demo': Failed (1 created"));
        assert!(text.contains("failed   Task 'anim': no pipeline step"));
        assert!(text.contains("problem  could not write back Shot#3"));
        assert!(!text.contains("sh010"));
    }
}
