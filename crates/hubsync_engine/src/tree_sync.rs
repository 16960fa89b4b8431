//! Breadth-first reconciliation of a whole project tree.
//!
//! Both directions walk an explicit FIFO queue of `(destination parent,
//! source entity)` pairs. An entity is only dequeued after its parent has been
//! materialized on the destination side, so creation never needs a parent
//! that does not exist yet.

use crate::client::{LocalHub, RemoteClient};
use crate::context::{RemoteParent, RunContext};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalEntity, LocalKind};
use crate::projection;
use crate::remote_tree::{NodeKey, RemoteTree};
use crate::report::{EntityOutcome, OutcomeKind};
use crate::validate::hidden_folder_types;
use hubsync_model::fields::{LOCAL_ID_FIELD, REMOVED};
use hubsync_model::{Filter, RemoteRecord, RemoteRef, RemoteType, SyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// Which side is read and which side is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Local hierarchy is the source; the remote service is updated.
    LocalToRemote,
    /// Remote service is the source; the local hierarchy is updated.
    RemoteToLocal,
}

impl Direction {
    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LocalToRemote => "local-to-remote",
            Direction::RemoteToLocal => "remote-to-local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "local-to-remote" | "push" => Ok(Direction::LocalToRemote),
            "remote-to-local" | "pull" => Ok(Direction::RemoteToLocal),
            other => Err(SyncError::precondition(format!("unknown direction '{other}'"))),
        }
    }
}

/// Runs one pass in the given direction. Nothing is committed here.
pub(crate) fn run<R, L>(ctx: &mut RunContext<'_, R, L>, direction: Direction) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    info!(project = %ctx.report.project, direction = %direction, "starting full-tree pass");
    match direction {
        Direction::LocalToRemote => push(ctx),
        Direction::RemoteToLocal => pull(ctx),
    }
}

/// Destination of a queued local entity.
#[derive(Debug, Clone)]
enum Dest {
    Ready(NodeKey),
    Unavailable(String),
}

fn push<R, L>(ctx: &mut RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    check_visible_folder_types(ctx)?;
    let mut tree = RemoteTree::load(
        ctx.remote,
        &ctx.remote_project,
        &ctx.resolver,
        &ctx.config.project_code_field,
    )?;
    let mut processed: HashSet<RemoteRef> = HashSet::new();
    let mut queue: VecDeque<(Dest, String)> = walkable_children(ctx, None)
        .into_iter()
        .map(|id| (Dest::Ready(NodeKey::Project), id))
        .collect();

    while let Some((dest, id)) = queue.pop_front() {
        ctx.check_cancelled()?;
        let Some(entity) = ctx.local.get(&id).cloned() else {
            continue;
        };
        debug!(local_id = %entity.id, "processing {}", entity.describe());

        let child_dest = match push_entity(ctx, &mut tree, &mut processed, &entity, dest) {
            Ok(next) => next,
            Err(e) if e.aborts_pass() => return Err(e),
            Err(e) => {
                error!(local_id = %entity.id, error = %e, "failed to push {}", entity.describe());
                ctx.report.record(
                    EntityOutcome::new(OutcomeKind::Failed, entity.describe())
                        .with_local(&entity.id)
                        .with_reason(e.to_string()),
                );
                Dest::Unavailable(format!("parent {} failed", entity.describe()))
            }
        };
        for child in walkable_children(ctx, Some(&id)) {
            queue.push_back((child_dest.clone(), child));
        }
    }

    push_project_attributes(ctx)?;
    Ok(())
}

/// Children walked by a push; versions belong to the publishing side.
fn walkable_children<R, L>(ctx: &RunContext<'_, R, L>, parent: Option<&str>) -> Vec<String>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    ctx.local
        .children(parent)
        .into_iter()
        .filter(|e| e.kind != LocalKind::Version)
        .map(|e| e.id.clone())
        .collect()
}

/// Enabled folder types used locally must be shown by the remote project.
fn check_visible_folder_types<R, L>(ctx: &RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let hidden = hidden_folder_types(&ctx.local, ctx.config, &ctx.resolver);
    if hidden.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = hidden.iter().map(|kind| kind.as_str()).collect();
    Err(SyncError::precondition(format!(
        "folder types {} are not visible in the remote project",
        names.join(", ")
    )))
}

fn push_entity<R, L>(
    ctx: &mut RunContext<'_, R, L>,
    tree: &mut RemoteTree,
    processed: &mut HashSet<RemoteRef>,
    entity: &LocalEntity,
    dest: Dest,
) -> SyncResult<Dest>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    if entity.is_grouping() {
        return Ok(Dest::Ready(tree.grouping(&entity.label)));
    }
    let parent = match dest {
        Dest::Ready(parent) => parent,
        Dest::Unavailable(reason) => {
            return Err(SyncError::ParentNotReady {
                entity: entity.describe(),
                parent: reason,
            })
        }
    };

    if entity.is_removed() {
        skip(ctx, entity, "marked removed");
        return Ok(Dest::Ready(parent));
    }
    let Some(kind) = entity.remote_type().filter(|k| ctx.resolver.is_enabled(*k)) else {
        skip(ctx, entity, "type is not synchronized");
        return Ok(Dest::Ready(parent));
    };

    let linked = match entity.remote_ref() {
        Some(target) => Some(linked_record(ctx, tree, entity, target)?),
        None => {
            let local = &ctx.local;
            tree.find_child(&parent, kind, &entity.name, |record| {
                !processed.contains(&record.to_ref())
                    && record.str_field(LOCAL_ID_FIELD).map_or(true, |id| {
                        id != REMOVED && (id == entity.id || local.get(id).is_none())
                    })
            })
            .cloned()
        }
    };

    let (mut record, outcome) = match linked {
        Some(record) => {
            if !processed.insert(record.to_ref()) {
                warn!(remote = %record, local_id = %entity.id, "remote record reached twice, skipping");
                ctx.report.record(
                    EntityOutcome::new(OutcomeKind::Skipped, entity.describe())
                        .with_local(&entity.id)
                        .with_remote(record.to_ref())
                        .with_reason("counterpart already processed"),
                );
                return Ok(Dest::Unavailable(format!("{} is a duplicate", entity.describe())));
            }
            let changes = ctx.remote_changes(entity, &record)?;
            if changes.is_empty() {
                (record, OutcomeKind::Unchanged)
            } else {
                let updated = ctx.remote.update(record.kind, record.id, &changes)?;
                debug!(remote = %updated, fields = changes.len(), "updated remote record");
                (updated, OutcomeKind::Updated)
            }
        }
        None => {
            let remote_parent = match &parent {
                NodeKey::Project => RemoteParent::Project,
                NodeKey::Record(r) => RemoteParent::Record(*r),
                NodeKey::Grouping(slug) => {
                    RemoteParent::Grouping(tree.grouping_label(slug).unwrap_or(slug).to_string())
                }
            };
            let created = ctx.create_remote(entity, kind, &remote_parent)?;
            processed.insert(created.to_ref());
            tree.insert_created(parent, created.clone());
            (created, OutcomeKind::Created)
        }
    };

    ctx.xref()
        .set(&mut ctx.local, &entity.id, &mut record, SyncStatus::Synced, &mut ctx.report)?;
    let target = record.to_ref();
    tree.replace(record);
    ctx.report.record(
        EntityOutcome::new(outcome, entity.describe())
            .with_local(&entity.id)
            .with_remote(target),
    );
    Ok(Dest::Ready(NodeKey::Record(target)))
}

/// The record a local entity is linked to.
///
/// A back-reference naming another local entity that is itself linked to the
/// record is a conflict. Any other stale back-reference is repaired by the
/// caller's cross-reference write.
fn linked_record<R, L>(
    ctx: &mut RunContext<'_, R, L>,
    tree: &RemoteTree,
    entity: &LocalEntity,
    target: RemoteRef,
) -> SyncResult<RemoteRecord>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let record = match tree.record(target) {
        Some(record) => record.clone(),
        None => ctx
            .remote
            .find_one(target.kind, &[Filter::id(target.id)])?
            .ok_or_else(|| SyncError::NotFound(format!("{target} linked from {}", entity.describe())))?,
    };

    if let Some(owner) = ctx.xref().get(&record).map(str::to_string) {
        if owner != entity.id {
            let conflicting = ctx
                .local
                .get_or_query(ctx.hub, &owner)?
                .is_some_and(|other| other.remote_ref() == Some(target));
            if conflicting {
                return Err(SyncError::CrossReferenceMismatch {
                    entity: entity.describe(),
                    expected: entity.id.clone(),
                    found: owner,
                });
            }
            warn!(remote = %record, stale = %owner, local_id = %entity.id, "repairing stale back-reference");
        }
    }
    Ok(record)
}

fn skip<R, L>(ctx: &mut RunContext<'_, R, L>, entity: &LocalEntity, reason: &str)
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    debug!(local_id = %entity.id, reason, "skipping {}", entity.describe());
    ctx.report.record(
        EntityOutcome::new(OutcomeKind::Skipped, entity.describe())
            .with_local(&entity.id)
            .with_reason(reason),
    );
}

fn push_project_attributes<R, L>(ctx: &mut RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let attributes = ctx.local.project().attribs.clone();
    let mut fields = ctx
        .mapper
        .to_remote(ctx.remote, &mut ctx.cache, &attributes, RemoteType::Project)?;
    fields.retain(|field, value| ctx.remote_project.get(field) != Some(&*value));
    if fields.is_empty() {
        return Ok(());
    }
    match ctx.remote.update(RemoteType::Project, ctx.remote_project.id, &fields) {
        Ok(updated) => ctx.remote_project = updated,
        Err(e) if e.aborts_pass() => return Err(e),
        Err(e) => ctx.report.downgrade(format!("project attributes were not written: {e}")),
    }
    Ok(())
}

/// Destination of a queued remote node.
#[derive(Debug, Clone)]
enum LocalDest {
    Ready(Option<String>),
    Unavailable(String),
}

fn pull<R, L>(ctx: &mut RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    prepare_local_types(ctx)?;
    let tree = RemoteTree::load(
        ctx.remote,
        &ctx.remote_project,
        &ctx.resolver,
        &ctx.config.project_code_field,
    )?;
    let mut queue: VecDeque<(LocalDest, NodeKey)> = tree
        .children(&NodeKey::Project)
        .into_iter()
        .map(|key| (LocalDest::Ready(None), key))
        .collect();

    while let Some((dest, key)) = queue.pop_front() {
        ctx.check_cancelled()?;
        let child_dest = match &key {
            NodeKey::Project => continue,
            NodeKey::Grouping(slug) => {
                let label = tree.grouping_label(slug).unwrap_or(slug).to_string();
                let (id, outcome) = ctx.ensure_local_grouping(&label);
                if outcome != OutcomeKind::Unchanged {
                    ctx.report.record(
                        EntityOutcome::new(outcome, format!("grouping '{label}'")).with_local(&id),
                    );
                }
                LocalDest::Ready(Some(id))
            }
            NodeKey::Record(target) => {
                let Some(record) = tree.record(*target).cloned() else {
                    continue;
                };
                match pull_record(ctx, &record, dest) {
                    Ok(next) => next,
                    Err(e) if e.aborts_pass() => return Err(e),
                    Err(e) => {
                        error!(remote = %record, error = %e, "failed to pull record");
                        ctx.report.record(
                            EntityOutcome::new(OutcomeKind::Failed, record.to_string())
                                .with_remote(record.to_ref())
                                .with_reason(e.to_string()),
                        );
                        let mut failed = record.clone();
                        ctx.xref().write_status(&mut failed, SyncStatus::Failed, &mut ctx.report);
                        LocalDest::Unavailable(format!("parent {record} failed"))
                    }
                }
            }
        };
        for child in tree.children(&key) {
            queue.push_back((child_dest.clone(), child));
        }
    }

    pull_project_attributes(ctx)?;
    Ok(())
}

/// Adds the folder and task types the remote tree needs to the local project.
fn prepare_local_types<R, L>(ctx: &mut RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    for kind in ctx.resolver.tree_types() {
        if kind.is_folder() {
            ctx.local.ensure_folder_type(kind.as_str());
        }
    }
    if ctx.resolver.is_enabled(RemoteType::Task) {
        let steps: Vec<String> = ctx
            .cache
            .steps(ctx.remote)?
            .iter()
            .filter_map(|step| step.str_field("code").map(str::to_string))
            .collect();
        for step in steps {
            ctx.local.ensure_task_type(&step);
        }
    }
    Ok(())
}

fn pull_record<R, L>(ctx: &mut RunContext<'_, R, L>, record: &RemoteRecord, dest: LocalDest) -> SyncResult<LocalDest>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let parent = match dest {
        LocalDest::Ready(parent) => parent,
        LocalDest::Unavailable(reason) => {
            return Err(SyncError::ParentNotReady {
                entity: record.to_string(),
                parent: reason,
            })
        }
    };
    if ctx.xref().get(record) == Some(REMOVED) {
        debug!(remote = %record, "skipping record removed on the local side");
        ctx.report.record(
            EntityOutcome::new(OutcomeKind::Skipped, record.to_string())
                .with_remote(record.to_ref())
                .with_reason("removed on the local side"),
        );
        return Ok(LocalDest::Ready(parent));
    }

    let entity = projection::project(record, &ctx.config.project_code_field, ctx.mapper.mappings())?;
    let target = record.to_ref();
    let back_reference = ctx.xref().get(record).map(str::to_string);

    let mut existing = None;
    if let Some(local_id) = &back_reference {
        if let Some(found) = ctx.local.get_or_query(ctx.hub, local_id)? {
            if let Some(current) = found.remote_ref().filter(|r| *r != target) {
                return Err(SyncError::CrossReferenceMismatch {
                    entity: found.describe(),
                    expected: current.to_string(),
                    found: target.to_string(),
                });
            }
            existing = Some(found.id);
        }
    }
    if existing.is_none() {
        let local_kind = local_kind_of(record.kind)?;
        existing = ctx
            .local
            .find_child(parent.as_deref(), local_kind, &entity.name, |e| {
                e.remote_type() == Some(target.kind)
                    && e.remote_ref().map_or(!e.is_removed(), |r| r == target)
            })
            .map(|e| e.id.clone());
    }

    let (id, outcome) = match existing {
        Some(id) => {
            let changed = ctx.apply_remote_values(&id, record, &entity.label)?;
            (id, if changed { OutcomeKind::Updated } else { OutcomeKind::Unchanged })
        }
        None => {
            let id = ctx.create_local(record, &entity, parent.as_deref(), back_reference)?;
            (id, OutcomeKind::Created)
        }
    };

    let mut linked = record.clone();
    ctx.xref()
        .set(&mut ctx.local, &id, &mut linked, SyncStatus::Synced, &mut ctx.report)?;
    ctx.report.record(
        EntityOutcome::new(outcome, record.to_string())
            .with_local(&id)
            .with_remote(target),
    );
    Ok(LocalDest::Ready(Some(id)))
}

pub(crate) fn local_kind_of(kind: RemoteType) -> SyncResult<LocalKind> {
    match kind {
        RemoteType::Task => Ok(LocalKind::Task),
        RemoteType::Version => Ok(LocalKind::Version),
        kind if kind.is_folder() => Ok(LocalKind::Folder),
        other => Err(hubsync_model::ModelError::unsupported("hierarchy type", other.as_str()).into()),
    }
}

fn pull_project_attributes<R, L>(ctx: &mut RunContext<'_, R, L>) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let project = ctx.remote_project.clone();
    for (key, value) in ctx.mapper.to_local(ctx.remote, &mut ctx.cache, &project)? {
        ctx.local.set_project_attribute(&key, value);
    }
    Ok(())
}
