//! Sync command implementation.

use crate::workspace::Workspace;
use hubsync_engine::{Direction, SyncConfig, SyncReport};
use std::path::Path;

/// Runs the sync command.
pub fn run(
    state: &Path,
    config: SyncConfig,
    project: &str,
    direction: Direction,
    retry: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Workspace::load(state)?.into_engine(config)?;

    let result = if retry {
        engine.synchronize_with_retry(project, direction)
    } else {
        engine.synchronize_project(project, direction)
    };

    // Remote writes land even when the pass fails, so the workspace is saved either way.
    Workspace::capture(&engine).save(state)?;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            println!("✗ Synchronization of '{project}' failed: {e}");
            return Err(e.into());
        }
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report, direction),
    }

    if report.is_synced() {
        Ok(())
    } else {
        Err(format!("project '{project}' is {}", report.status).into())
    }
}

fn print_text_output(report: &SyncReport, direction: Direction) {
    println!("Synchronized {direction}");
    println!();
    print!("{report}");
    println!();
    if report.is_synced() {
        println!("✓ Project is in sync");
    } else {
        println!("✗ Some entities were not synchronized");
    }
}
