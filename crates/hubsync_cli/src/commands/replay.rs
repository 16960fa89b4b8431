//! Replay command implementation.

use crate::workspace::Workspace;
use hubsync_engine::{Job, MemoryQueue, RetryConfig, SyncConfig, Worker, WorkerOutcome};
use hubsync_model::{Envelope, Notification};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Replay summary.
#[derive(Debug, Default, Serialize)]
pub struct ReplayResult {
    /// Events read from the file.
    pub events: usize,
    /// Jobs that completed.
    pub applied: usize,
    /// Notifications refused during validation.
    pub rejected: usize,
    /// Re-deliveries after a retryable failure.
    pub retried: usize,
    /// Jobs given up on, with the reason.
    pub dead_letters: Vec<DeadLetter>,
}

/// A job the worker gave up on.
#[derive(Debug, Serialize)]
pub struct DeadLetter {
    /// Job description.
    pub job: String,
    /// Attempts made.
    pub attempts: u32,
    /// Last failure.
    pub reason: String,
}

/// Runs the replay command.
pub fn run(
    state: &Path,
    config: SyncConfig,
    events: &Path,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let notifications = read_events(events)?;
    // Backoff delays only make sense against a live service.
    let retry = RetryConfig::immediate(config.retry.max_attempts);
    let engine = Arc::new(Workspace::load(state)?.into_engine(config)?);

    let queue = Arc::new(MemoryQueue::new());
    for notification in &notifications {
        queue.push(Job::Change(notification.clone()));
    }

    let worker = Worker::new(Arc::clone(&engine), Arc::clone(&queue)).with_retry(retry);
    let outcomes = worker.drain()?;
    Workspace::capture(&engine).save(state)?;

    let mut result = ReplayResult {
        events: notifications.len(),
        ..ReplayResult::default()
    };
    for outcome in outcomes {
        match outcome {
            WorkerOutcome::Applied => result.applied += 1,
            WorkerOutcome::Rejected => result.rejected += 1,
            WorkerOutcome::Retried => result.retried += 1,
            WorkerOutcome::DeadLettered | WorkerOutcome::Idle => {}
        }
    }
    result.dead_letters = queue
        .dead_letters()
        .into_iter()
        .map(|(queued, reason)| DeadLetter {
            job: queued.job.describe(),
            attempts: queued.attempts,
            reason,
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    if result.dead_letters.is_empty() {
        Ok(())
    } else {
        Err(format!("{} notification(s) could not be applied", result.dead_letters.len()).into())
    }
}

/// Reads one envelope per line. Blank lines and `#` comments are ignored.
pub fn read_events(path: &Path) -> Result<Vec<Notification>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let mut notifications = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = serde_json::from_str::<Envelope>(line)
            .map_err(|e| e.to_string())
            .and_then(|envelope| Notification::try_from(envelope).map_err(|e| e.to_string()));
        match parsed {
            Ok(notification) => notifications.push(notification),
            Err(e) => return Err(format!("{}:{}: {e}", path.display(), index + 1).into()),
        }
    }
    debug!(count = notifications.len(), path = %path.display(), "events read");
    Ok(notifications)
}

fn print_text_output(result: &ReplayResult) {
    println!("Replay Summary");
    println!("==============");
    println!("Events:       {}", result.events);
    println!("Applied:      {}", result.applied);
    println!("Rejected:     {}", result.rejected);
    println!("Retried:      {}", result.retried);
    println!("Dead letters: {}", result.dead_letters.len());

    for letter in &result.dead_letters {
        println!(
            "  ✗ {} (after {} attempt(s)): {}",
            letter.job, letter.attempts, letter.reason
        );
    }

    println!();
    if result.dead_letters.is_empty() {
        println!("✓ All notifications processed");
    } else {
        println!("✗ Some notifications were dead-lettered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_envelopes_and_skips_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(
            &path,
            concat!(
                "# recorded from the hub\n",
                r#"{"topic": "entity.folder.label_changed", "payload": {"project": "demo", "entityId": "f1", "newValue": "Shot 10"}}"#,
                "\n\n",
                r#"{"topic": "remote.event", "payload": {"type": "entity_retirement", "entityType": "Shot", "entityId": 4, "projectId": 1}}"#,
                "\n",
            ),
        )
        .unwrap();

        let notifications = read_events(&path).unwrap();
        assert_eq!(notifications.len(), 2);
        assert!(matches!(notifications[0], Notification::Local(_)));
        assert!(matches!(notifications[1], Notification::Remote(_)));
    }

    #[test]
    fn malformed_lines_are_located() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"topic": "entity.folder.label_changed", "payload": {"project": "demo", "entityId": "f1", "newValue": "x"}}"#,
                "\n",
                "{\"topic\": 3}\n",
            ),
        )
        .unwrap();

        let err = read_events(&path).unwrap_err();
        assert!(err.to_string().contains("events.jsonl:2:"));
    }
}
