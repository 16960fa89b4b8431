//! Validate command implementation.

use crate::workspace::Workspace;
use hubsync_engine::{validate_attribute_map, validate_project, SyncConfig, ValidationIssue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Validation result.
#[derive(Debug, Serialize)]
pub struct ValidateResult {
    /// Problems with the attribute map.
    pub attribute_map: Vec<ValidationIssue>,
    /// Problems per local project.
    pub projects: BTreeMap<String, Vec<ValidationIssue>>,
}

impl ValidateResult {
    fn issue_count(&self) -> usize {
        self.attribute_map.len() + self.projects.values().map(Vec::len).sum::<usize>()
    }
}

/// Runs the validate command.
pub fn run(
    state: &Path,
    config: SyncConfig,
    project: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::load(state)?;
    let names: Vec<String> = match project {
        Some(name) => vec![name.to_string()],
        None => workspace
            .hub
            .projects
            .iter()
            .map(|p| p.project.name.clone())
            .collect(),
    };
    let engine = workspace.into_engine(config)?;

    let mut result = ValidateResult {
        attribute_map: validate_attribute_map(engine.remote().as_ref(), engine.config())?,
        projects: BTreeMap::new(),
    };
    for name in names {
        let issues = validate_project(
            engine.remote().as_ref(),
            engine.hub().as_ref(),
            engine.config(),
            &name,
        )?;
        result.projects.insert(name, issues);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    match result.issue_count() {
        0 => Ok(()),
        n => Err(format!("{n} issue(s) found").into()),
    }
}

fn print_text_output(result: &ValidateResult) {
    println!("Attribute map");
    if result.attribute_map.is_empty() {
        println!("  ok");
    }
    for issue in &result.attribute_map {
        println!("  ✗ {issue}");
    }

    for (project, issues) in &result.projects {
        println!();
        println!("Project '{project}'");
        if issues.is_empty() {
            println!("  ok");
        }
        for issue in issues {
            println!("  ✗ {issue}");
        }
    }

    println!();
    if result.issue_count() == 0 {
        println!("✓ Validation passed");
    } else {
        println!("✗ Validation failed");
    }
}
