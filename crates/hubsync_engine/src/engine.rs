//! Entry points: full-tree synchronization and notification handling.

use crate::client::{LocalHub, RemoteClient};
use crate::config::SyncConfig;
use crate::context::RunContext;
use crate::error::{SyncError, SyncResult};
use crate::reactor::{self, Reaction};
use crate::report::{OutcomeKind, SyncReport};
use crate::tree_sync::{self, Direction};
use hubsync_model::fields::LOCAL_ID_FIELD;
use hubsync_model::{Filter, Notification, RemoteType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Statistics about engine activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Full-tree passes that completed.
    pub runs_completed: u64,
    /// Notifications that reached `Committed`.
    pub notifications_applied: u64,
    /// Notifications rejected during validation.
    pub notifications_rejected: u64,
    /// Entities created on either side.
    pub entities_created: u64,
    /// Entities that failed to reconcile.
    pub entities_failed: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last successful pass or notification.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Reconciles projects between a remote tracking service and a local hub.
///
/// One pass or notification holds a project exclusively; different projects
/// may be processed from different threads through a shared engine.
pub struct SyncEngine<R: RemoteClient, L: LocalHub> {
    config: SyncConfig,
    remote: Arc<R>,
    hub: Arc<L>,
    stats: RwLock<SyncStats>,
    active: Mutex<HashSet<String>>,
    cancelled: AtomicBool,
}

/// Releases a project claim when dropped.
struct ProjectGuard<'e> {
    active: &'e Mutex<HashSet<String>>,
    project: String,
}

impl Drop for ProjectGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.project);
    }
}

impl<R: RemoteClient, L: LocalHub> SyncEngine<R, L> {
    /// Creates a new engine.
    pub fn new(config: SyncConfig, remote: R, hub: L) -> Self {
        Self::with_shared(config, Arc::new(remote), Arc::new(hub))
    }

    /// Creates an engine over clients shared with the caller.
    pub fn with_shared(config: SyncConfig, remote: Arc<R>, hub: Arc<L>) -> Self {
        Self {
            config,
            remote,
            hub,
            stats: RwLock::new(SyncStats::default()),
            active: Mutex::new(HashSet::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The remote client.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The local hub client.
    pub fn hub(&self) -> &Arc<L> {
        &self.hub
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels running and future passes until [`reset_cancel`](Self::reset_cancel).
    ///
    /// Observed between queue items; a cancelled pass commits nothing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if the engine has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn claim(&self, project: &str) -> SyncResult<ProjectGuard<'_>> {
        let mut active = self.active.lock();
        if !active.insert(project.to_string()) {
            return Err(SyncError::ProjectBusy(project.to_string()));
        }
        Ok(ProjectGuard {
            active: &self.active,
            project: project.to_string(),
        })
    }

    /// Reconciles a whole project in one direction.
    ///
    /// Per-entity failures are reported in the returned report and downgrade
    /// its status; transport, commit and precondition failures abort the pass
    /// and are returned as errors.
    pub fn synchronize_project(&self, project: &str, direction: Direction) -> SyncResult<SyncReport> {
        let _guard = self.claim(project)?;
        let started = Instant::now();

        match self.run_pass(project, direction) {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                stats.entities_created += report.count(OutcomeKind::Created) as u64;
                stats.entities_failed += report.count(OutcomeKind::Failed) as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = report.problems.last().cloned();
                info!(
                    project = %project,
                    direction = %direction,
                    status = %report.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "synchronization finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(project, &e);
                Err(e)
            }
        }
    }

    fn run_pass(&self, project: &str, direction: Direction) -> SyncResult<SyncReport> {
        let mut ctx = RunContext::open(
            self.remote.as_ref(),
            self.hub.as_ref(),
            &self.config,
            project,
            &self.cancelled,
        )?;
        tree_sync::run(&mut ctx, direction)?;
        ctx.conclude()
    }

    /// Performs a full-tree pass with retry on retryable errors.
    pub fn synchronize_with_retry(&self, project: &str, direction: Direction) -> SyncResult<SyncReport> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts.max(1) {
            if attempt > 0 {
                let delay = retry_config.delay_for_attempt(attempt);
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.synchronize_project(project, direction) {
                Ok(report) => return Ok(report),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        warn!(project = %project, attempt, error = %e, "retrying synchronization");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::precondition("no synchronization attempts made")))
    }

    /// Applies one change notification.
    ///
    /// Validation failures end in a [`Reaction`] in state `Rejected`;
    /// errors are returned for the caller to retry or dead-letter.
    pub fn react_to_change(&self, notification: &Notification) -> SyncResult<Reaction> {
        let Some(project) = self.project_for(notification)? else {
            self.stats.write().notifications_rejected += 1;
            return Ok(Reaction::rejected(
                "",
                format!("no local project for {}", notification.describe()),
            ));
        };
        let _guard = self.claim(&project)?;

        let result = reactor::react(
            self.remote.as_ref(),
            self.hub.as_ref(),
            &self.config,
            &project,
            notification,
            &self.cancelled,
        );
        match result {
            Ok(reaction) => {
                let mut stats = self.stats.write();
                if reaction.is_committed() {
                    stats.notifications_applied += 1;
                    stats.entities_created += reaction.report.count(OutcomeKind::Created) as u64;
                    stats.last_sync_time = Some(Instant::now());
                } else {
                    stats.notifications_rejected += 1;
                }
                Ok(reaction)
            }
            Err(e) => {
                self.handle_error(&project, &e);
                Err(e)
            }
        }
    }

    /// Local project name a notification belongs to.
    ///
    /// Remote notifications are routed through the remote project's
    /// back-reference, falling back to its code field.
    pub fn project_for(&self, notification: &Notification) -> SyncResult<Option<String>> {
        match notification {
            Notification::Local(change) => Ok(Some(change.project.clone())),
            Notification::Remote(change) => {
                let Some(project) = self
                    .remote
                    .find_one(RemoteType::Project, &[Filter::id(change.project_id)])?
                else {
                    return Ok(None);
                };
                Ok(project
                    .str_field(LOCAL_ID_FIELD)
                    .or_else(|| project.str_field(&self.config.project_code_field))
                    .map(str::to_string))
            }
        }
    }

    fn handle_error(&self, project: &str, e: &SyncError) {
        error!(project = %project, error = %e, "synchronization failed");
        let mut stats = self.stats.write();
        stats.last_error = Some(e.to_string());
    }
}
