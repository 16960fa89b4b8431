//! Inspect command implementation.

use crate::workspace::{Engine, Workspace};
use hubsync_engine::{LocalEntity, RemoteClient, SyncConfig};
use hubsync_model::fields::{LOCAL_ID_FIELD, PROJECT_FIELD, SYNC_STATUS_FIELD};
use hubsync_model::{RemoteRecord, RemoteRef};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// How a local entity relates to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Both sides point at each other.
    Linked,
    /// No counterpart yet.
    Unlinked,
    /// Folder synthesized to group remote records.
    Grouping,
    /// The counterpart was retired remotely.
    Removed,
    /// The recorded counterpart no longer exists.
    Dangling,
    /// The counterpart points back at another entity.
    Mismatch,
    /// A remote record no local entity is linked to.
    RemoteOnly,
}

impl LinkState {
    fn as_str(self) -> &'static str {
        match self {
            LinkState::Linked => "linked",
            LinkState::Unlinked => "unlinked",
            LinkState::Grouping => "grouping",
            LinkState::Removed => "removed",
            LinkState::Dangling => "dangling",
            LinkState::Mismatch => "mismatch",
            LinkState::RemoteOnly => "remote-only",
        }
    }

    fn is_healthy(self) -> bool {
        !matches!(self, LinkState::Dangling | LinkState::Mismatch)
    }
}

/// One row of the link table.
#[derive(Debug, Serialize)]
pub struct LinkRow {
    /// Local entity id.
    pub local_id: Option<String>,
    /// Human-readable description.
    pub entity: String,
    /// Linked remote record.
    pub remote: Option<RemoteRef>,
    /// Local id stored on the remote record.
    pub back_reference: Option<String>,
    /// Sync status stored on the remote record.
    pub status: Option<String>,
    /// Link state.
    pub state: LinkState,
}

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Local project name.
    pub project: String,
    /// Remote project the local one is linked to.
    pub remote_project: Option<RemoteRef>,
    /// One row per entity.
    pub links: Vec<LinkRow>,
}

/// Runs the inspect command.
pub fn run(
    state: &Path,
    config: SyncConfig,
    project: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Workspace::load(state)?.into_engine(config)?;
    let result = inspect(&engine, project)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    let broken = result.links.iter().filter(|row| !row.state.is_healthy()).count();
    if broken == 0 {
        Ok(())
    } else {
        Err(format!("{broken} broken link(s) in '{project}'").into())
    }
}

/// Builds the link table of a project.
pub fn inspect(engine: &Engine, project: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let local = engine
        .hub()
        .project(project)
        .ok_or_else(|| format!("project '{project}' does not exist locally"))?;
    let remote_project = local.remote_ref();

    let mut links = Vec::new();
    let mut seen = HashSet::new();
    for entity in engine.hub().entities(project) {
        let row = local_row(engine, &entity)?;
        if let Some(target) = row.remote {
            seen.insert(target);
        }
        links.push(row);
    }

    if let Some(remote_project) = remote_project {
        let mut orphans: Vec<RemoteRecord> = engine
            .config()
            .enabled_entities
            .iter()
            .flat_map(|kind| engine.remote().records(*kind))
            .filter(|r| r.link(PROJECT_FIELD) == Some(remote_project))
            .filter(|r| !seen.contains(&r.to_ref()))
            .collect();
        orphans.sort_by_key(RemoteRecord::to_ref);
        links.extend(orphans.into_iter().map(|record| LinkRow {
            local_id: None,
            entity: record.to_string(),
            remote: Some(record.to_ref()),
            back_reference: record.str_field(LOCAL_ID_FIELD).map(str::to_string),
            status: record.str_field(SYNC_STATUS_FIELD).map(str::to_string),
            state: LinkState::RemoteOnly,
        }));
    }

    Ok(InspectResult {
        project: project.to_string(),
        remote_project,
        links,
    })
}

fn local_row(engine: &Engine, entity: &LocalEntity) -> Result<LinkRow, Box<dyn std::error::Error>> {
    let mut row = LinkRow {
        local_id: Some(entity.id.clone()),
        entity: entity.describe(),
        remote: entity.remote_ref(),
        back_reference: None,
        status: None,
        state: LinkState::Unlinked,
    };

    if entity.is_grouping() {
        row.state = LinkState::Grouping;
        return Ok(row);
    }
    if entity.is_removed() {
        row.state = LinkState::Removed;
        return Ok(row);
    }
    let Some(target) = row.remote else {
        return Ok(row);
    };

    let record = match engine.remote().record(target) {
        Some(record) => record,
        None => {
            let retired = engine.remote().find_retired(target.kind, target.id)?;
            row.state = if retired.is_some() {
                LinkState::Removed
            } else {
                LinkState::Dangling
            };
            return Ok(row);
        }
    };

    row.back_reference = record.str_field(LOCAL_ID_FIELD).map(str::to_string);
    row.status = record.str_field(SYNC_STATUS_FIELD).map(str::to_string);
    row.state = match row.back_reference.as_deref() {
        Some(id) if id == entity.id => LinkState::Linked,
        Some(_) => LinkState::Mismatch,
        None => LinkState::Linked,
    };
    Ok(row)
}

fn print_text_output(result: &InspectResult) {
    println!("Project '{}'", result.project);
    match result.remote_project {
        Some(target) => println!("Linked to: {target}"),
        None => println!("Linked to: (none)"),
    }
    println!();

    println!(
        "{:<12} {:<28} {:<16} {:<12} {}",
        "STATE", "ENTITY", "REMOTE", "STATUS", "LOCAL ID"
    );
    for row in &result.links {
        println!(
            "{:<12} {:<28} {:<16} {:<12} {}",
            row.state.as_str(),
            row.entity,
            row.remote.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
            row.status.as_deref().unwrap_or("-"),
            row.local_id.as_deref().unwrap_or("-"),
        );
    }

    let broken = result.links.iter().filter(|row| !row.state.is_healthy()).count();
    println!();
    if broken == 0 {
        println!("✓ All links consistent");
    } else {
        println!("✗ {broken} broken link(s)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_engine::{LocalProject, MemoryHub, MemoryRemote, SyncEngine};
    use hubsync_model::fields::{REMOTE_ID_ATTRIB, REMOTE_TYPE_ATTRIB};
    use hubsync_model::{Fields, RemoteType};
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn classifies_every_link() {
        let remote = MemoryRemote::new();
        let project = remote.insert(RemoteType::Project, fields(&[("code", json!("demo"))]));
        let on_project = project.to_ref().to_value();
        let linked = remote.insert(
            RemoteType::Shot,
            fields(&[("project", on_project.clone()), (LOCAL_ID_FIELD, json!("a"))]),
        );
        let foreign = remote.insert(
            RemoteType::Shot,
            fields(&[("project", on_project.clone()), (LOCAL_ID_FIELD, json!("zzz"))]),
        );
        let orphan = remote.insert(RemoteType::Sequence, fields(&[("project", on_project)]));

        let hub = MemoryHub::new();
        let mut local = LocalProject::new("demo");
        local.attribs.insert(REMOTE_ID_ATTRIB.into(), json!(project.id.to_string()));
        local.attribs.insert(REMOTE_TYPE_ATTRIB.into(), json!("Project"));
        hub.add_project(local);
        let link = |id: &str, target: &RemoteRecord| {
            LocalEntity::folder(id, None, "Shot", id)
                .with_attribute(REMOTE_ID_ATTRIB, target.id.to_string())
                .with_attribute(REMOTE_TYPE_ATTRIB, "Shot")
        };
        hub.add_entity("demo", link("a", &linked));
        hub.add_entity("demo", link("b", &foreign));
        hub.add_entity(
            "demo",
            LocalEntity::folder("c", None, "Shot", "c")
                .with_attribute(REMOTE_ID_ATTRIB, "999")
                .with_attribute(REMOTE_TYPE_ATTRIB, "Shot"),
        );
        hub.add_entity("demo", LocalEntity::folder("d", None, "Shot", "d"));

        let config = SyncConfig::default().with_enabled_entities([RemoteType::Sequence, RemoteType::Shot]);
        let engine = SyncEngine::new(config, remote, hub);
        let result = inspect(&engine, "demo").unwrap();

        let state_of = |id: &str| {
            result
                .links
                .iter()
                .find(|row| row.local_id.as_deref() == Some(id))
                .map(|row| row.state)
        };
        assert_eq!(result.remote_project, Some(project.to_ref()));
        assert_eq!(state_of("a"), Some(LinkState::Linked));
        assert_eq!(state_of("b"), Some(LinkState::Mismatch));
        assert_eq!(state_of("c"), Some(LinkState::Dangling));
        assert_eq!(state_of("d"), Some(LinkState::Unlinked));

        let remote_only: Vec<_> = result
            .links
            .iter()
            .filter(|row| row.state == LinkState::RemoteOnly)
            .filter_map(|row| row.remote)
            .collect();
        assert_eq!(remote_only, vec![orphan.to_ref()]);
    }

    #[test]
    fn unknown_projects_are_errors() {
        let engine = SyncEngine::new(SyncConfig::default(), MemoryRemote::new(), MemoryHub::new());
        assert!(inspect(&engine, "nope").is_err());
    }
}
