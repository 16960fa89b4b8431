//! Queue-driven worker loop.
//!
//! A [`Worker`] takes one job at a time from a [`NotificationSource`] and
//! runs it through the engine. Retryable failures (a parent that is not
//! materialized yet, a transport hiccup, a failed commit, a busy project)
//! go back on the queue with backoff; everything else is dead-lettered.

use crate::client::{LocalHub, RemoteClient};
use crate::config::RetryConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::tree_sync::Direction;
use hubsync_model::Notification;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Unit of work for the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Full-tree pass over one project.
    SyncProject {
        /// Local project name.
        project: String,
        /// Direction of the pass.
        direction: Direction,
    },
    /// One change notification.
    Change(Notification),
}

impl Job {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Job::SyncProject { project, direction } => format!("sync '{project}' {direction}"),
            Job::Change(notification) => notification.describe(),
        }
    }
}

/// A job as held by a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    /// Queue-assigned id.
    pub id: u64,
    /// The work.
    pub job: Job,
    /// Attempts made so far.
    pub attempts: u32,
}

/// Source of jobs with at-least-once delivery.
pub trait NotificationSource: Send + Sync {
    /// Takes the next job that is due, if any.
    fn next(&self) -> SyncResult<Option<QueuedJob>>;

    /// Marks a job as done.
    fn ack(&self, job: &QueuedJob) -> SyncResult<()>;

    /// Puts a job back, to be delivered again after `delay`.
    fn retry(&self, job: QueuedJob, delay: Duration) -> SyncResult<()>;

    /// Gives up on a job.
    fn dead_letter(&self, job: QueuedJob, reason: &str) -> SyncResult<()>;
}

/// What one worker step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// No job was due.
    Idle,
    /// The job completed.
    Applied,
    /// The notification was rejected during validation and will not be retried.
    Rejected,
    /// The job failed and was re-enqueued.
    Retried,
    /// The job failed for good.
    DeadLettered,
}

/// In-memory job queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<(Instant, QueuedJob)>>,
    dead: Mutex<Vec<(QueuedJob, String)>>,
    acked: AtomicU64,
    next_id: AtomicU64,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job, due immediately. Returns its id.
    pub fn push(&self, job: Job) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().push_back((
            Instant::now(),
            QueuedJob {
                id,
                job,
                attempts: 0,
            },
        ));
        id
    }

    /// Number of jobs waiting, due or not.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Number of acknowledged jobs.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    /// Dead-lettered jobs with the reason they failed.
    pub fn dead_letters(&self) -> Vec<(QueuedJob, String)> {
        self.dead.lock().clone()
    }
}

impl NotificationSource for MemoryQueue {
    fn next(&self) -> SyncResult<Option<QueuedJob>> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let due = pending.iter().position(|(not_before, _)| *not_before <= now);
        Ok(due.and_then(|index| pending.remove(index)).map(|(_, job)| job))
    }

    fn ack(&self, _job: &QueuedJob) -> SyncResult<()> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn retry(&self, job: QueuedJob, delay: Duration) -> SyncResult<()> {
        self.pending.lock().push_back((Instant::now() + delay, job));
        Ok(())
    }

    fn dead_letter(&self, job: QueuedJob, reason: &str) -> SyncResult<()> {
        self.dead.lock().push((job, reason.to_string()));
        Ok(())
    }
}

/// Runs queued jobs through a [`SyncEngine`].
pub struct Worker<R: RemoteClient, L: LocalHub, Q: NotificationSource> {
    engine: Arc<SyncEngine<R, L>>,
    queue: Arc<Q>,
    retry: RetryConfig,
}

impl<R: RemoteClient, L: LocalHub, Q: NotificationSource> Worker<R, L, Q> {
    /// Creates a worker using the engine's retry configuration.
    pub fn new(engine: Arc<SyncEngine<R, L>>, queue: Arc<Q>) -> Self {
        let retry = engine.config().retry.clone();
        Self { engine, queue, retry }
    }

    /// Overrides the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<SyncEngine<R, L>> {
        &self.engine
    }

    /// Processes at most one job.
    ///
    /// Only queue failures are returned as errors; job failures are retried
    /// or dead-lettered.
    pub fn run_once(&self) -> SyncResult<WorkerOutcome> {
        let Some(mut job) = self.queue.next()? else {
            return Ok(WorkerOutcome::Idle);
        };
        job.attempts += 1;
        debug!(job = job.id, attempt = job.attempts, work = %job.job.describe(), "processing job");

        let result = match &job.job {
            Job::SyncProject { project, direction } => self
                .engine
                .synchronize_project(project, *direction)
                .map(|_| WorkerOutcome::Applied),
            Job::Change(notification) => self.engine.react_to_change(notification).map(|reaction| {
                if reaction.is_committed() {
                    WorkerOutcome::Applied
                } else {
                    info!(
                        job = job.id,
                        reason = reaction.reason.as_deref().unwrap_or_default(),
                        "notification rejected"
                    );
                    WorkerOutcome::Rejected
                }
            }),
        };

        match result {
            Ok(outcome) => {
                self.queue.ack(&job)?;
                Ok(outcome)
            }
            Err(e) if e.is_retryable() && job.attempts < self.retry.max_attempts => {
                let delay = self.retry.delay_for_attempt(job.attempts);
                warn!(
                    job = job.id,
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "re-enqueueing job"
                );
                self.queue.retry(job, delay)?;
                Ok(WorkerOutcome::Retried)
            }
            Err(e) => {
                error!(job = job.id, attempts = job.attempts, error = %e, "dead-lettering job");
                self.queue.dead_letter(job, &e.to_string())?;
                Ok(WorkerOutcome::DeadLettered)
            }
        }
    }

    /// Processes jobs until none is due. Returns the outcomes in order.
    ///
    /// Stops early when the engine is cancelled.
    pub fn drain(&self) -> SyncResult<Vec<WorkerOutcome>> {
        let mut outcomes = Vec::new();
        while !self.engine.is_cancelled() {
            match self.run_once()? {
                WorkerOutcome::Idle => break,
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::memory_hub::MemoryHub;
    use crate::memory_remote::MemoryRemote;
    use serde_json::json;

    fn worker() -> (Worker<MemoryRemote, MemoryHub, MemoryQueue>, Arc<MemoryQueue>) {
        let config = SyncConfig::default().with_retry(RetryConfig::immediate(3));
        let engine = Arc::new(SyncEngine::new(config, MemoryRemote::new(), MemoryHub::new()));
        let queue = Arc::new(MemoryQueue::new());
        (Worker::new(engine, Arc::clone(&queue)), queue)
    }

    #[test]
    fn empty_queue_is_idle() {
        let (worker, _) = worker();
        assert_eq!(worker.run_once().unwrap(), WorkerOutcome::Idle);
        assert!(worker.drain().unwrap().is_empty());
    }

    #[test]
    fn delayed_jobs_wait() {
        let queue = MemoryQueue::new();
        queue.push(Job::SyncProject {
            project: "demo".into(),
            direction: Direction::LocalToRemote,
        });
        let job = queue.next().unwrap().unwrap();
        queue.retry(job, Duration::from_secs(3600)).unwrap();
        assert!(queue.next().unwrap().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn precondition_failures_are_dead_lettered() {
        let (worker, queue) = worker();
        queue.push(Job::SyncProject {
            project: "missing".into(),
            direction: Direction::RemoteToLocal,
        });
        assert_eq!(worker.drain().unwrap(), vec![WorkerOutcome::DeadLettered]);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempts, 1);
        assert!(dead[0].1.contains("precondition"));
    }

    #[test]
    fn rejected_notifications_are_acked() {
        let (worker, queue) = worker();
        let notification = Notification::from_topic(
            "entity.folder.created",
            json!({"project": "missing", "entityId": "abc"}),
        )
        .unwrap();
        queue.push(Job::Change(notification));
        assert_eq!(worker.drain().unwrap(), vec![WorkerOutcome::Rejected]);
        assert_eq!(queue.acked(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_engine_stops_draining() {
        let (worker, queue) = worker();
        queue.push(Job::SyncProject {
            project: "missing".into(),
            direction: Direction::RemoteToLocal,
        });
        worker.engine().cancel();
        assert!(worker.drain().unwrap().is_empty());
        assert_eq!(queue.len(), 1);
    }
}
