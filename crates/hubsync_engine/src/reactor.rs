//! Incremental reaction to single change notifications.
//!
//! A notification moves through `Received -> Validated -> Applied ->
//! Committed`, or ends in `Rejected` when the project does not accept
//! synchronization. Everything one notification changes locally is buffered
//! and committed in a single call.

use crate::client::{LocalHub, RemoteClient};
use crate::config::{SyncConfig, ASSIGNEES_ATTRIB, STATUS_ATTRIB, TAGS_ATTRIB};
use crate::context::{RemoteParent, RunContext};
use crate::error::{SyncError, SyncResult};
use crate::local::LocalEntity;
use crate::projection::{self, label_field, record_name};
use crate::report::{EntityOutcome, OutcomeKind, SyncReport};
use crate::tree_sync::local_kind_of;
use hubsync_model::fields::{PROJECT_FIELD, RETIREMENT_FIELD};
use hubsync_model::{
    same_slug, slug_key, Attributes, Fields, Filter, LocalAction, LocalChange, Notification, ParentRef,
    RemoteChange, RemoteEventKind, RemoteRecord, RemoteRef, RemoteType, SyncStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

/// Lifecycle state of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactorState {
    /// Parsed, nothing checked yet.
    Received,
    /// The project accepts synchronization.
    Validated,
    /// Changes computed and buffered.
    Applied,
    /// Local changes committed.
    Committed,
    /// The project does not accept the notification. Not retried.
    Rejected,
}

/// Result of reacting to one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    /// Final state.
    pub state: ReactorState,
    /// Why the notification was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Outcomes of the affected entities.
    pub report: SyncReport,
}

impl Reaction {
    pub(crate) fn rejected(project: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!(project = %project, reason = %reason, "notification rejected");
        Self {
            state: ReactorState::Rejected,
            reason: Some(reason),
            report: SyncReport::new(project),
        }
    }

    /// True when the notification reached `Committed`.
    pub fn is_committed(&self) -> bool {
        self.state == ReactorState::Committed
    }
}

/// Applies one notification to the project it belongs to.
pub(crate) fn react<R, L>(
    remote: &R,
    hub: &L,
    config: &SyncConfig,
    project: &str,
    notification: &Notification,
    cancelled: &AtomicBool,
) -> SyncResult<Reaction>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    debug!(project = %project, state = ?ReactorState::Received, "{}", notification.describe());
    let mut ctx = match RunContext::open(remote, hub, config, project, cancelled) {
        Ok(ctx) => ctx,
        Err(SyncError::Precondition(reason)) => return Ok(Reaction::rejected(project, reason)),
        Err(e) => return Err(e),
    };

    match notification {
        Notification::Remote(change) => {
            if change.project_id != ctx.remote_project.id {
                return Ok(Reaction::rejected(
                    project,
                    format!(
                        "event belongs to remote project #{}, not #{}",
                        change.project_id, ctx.remote_project.id
                    ),
                ));
            }
            if !ctx.auto_sync_enabled() {
                return Ok(Reaction::rejected(project, "automatic synchronization is disabled"));
            }
        }
        Notification::Local(_) => {
            if !ctx.local.project().push_enabled() {
                return Ok(Reaction::rejected(project, "pushing local changes is disabled"));
            }
        }
    }
    debug!(project = %project, state = ?ReactorState::Validated, "notification validated");

    ctx.check_cancelled()?;
    match notification {
        Notification::Remote(change) => apply_remote(&mut ctx, change)?,
        Notification::Local(change) => apply_local(&mut ctx, change)?,
    }
    debug!(project = %project, state = ?ReactorState::Applied, "notification applied");

    let applied = ctx.local.commit(ctx.hub)?;
    info!(project = %project, applied, "notification committed");
    Ok(Reaction {
        state: ReactorState::Committed,
        reason: None,
        report: ctx.report,
    })
}

fn apply_remote<R, L>(ctx: &mut RunContext<'_, R, L>, change: &RemoteChange) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let target = change.entity;
    if !ctx.resolver.is_enabled(target.kind) {
        return skip_remote(ctx, target, "type is not synchronized");
    }
    match &change.kind {
        RemoteEventKind::NewEntity | RemoteEventKind::Revival => remote_created(ctx, target),
        RemoteEventKind::AttributeChange { attribute } if attribute == RETIREMENT_FIELD => {
            if !change.new_value.is_null() {
                return skip_remote(ctx, target, "retirement is handled by its own event");
            }
            if target.kind == RemoteType::Asset {
                return skip_remote(ctx, target, "asset revivals are ignored");
            }
            remote_created(ctx, target)
        }
        RemoteEventKind::AttributeChange { attribute } => {
            remote_attribute_changed(ctx, target, attribute, &change.new_value)
        }
        RemoteEventKind::Retirement => remote_retired(ctx, target),
    }
}

fn skip_remote<R, L>(ctx: &mut RunContext<'_, R, L>, target: RemoteRef, reason: &str) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    debug!(remote = %target, reason, "skipping remote event");
    ctx.report.record(
        EntityOutcome::new(OutcomeKind::Skipped, target.to_string())
            .with_remote(target)
            .with_reason(reason),
    );
    Ok(())
}

fn remote_created<R, L>(ctx: &mut RunContext<'_, R, L>, target: RemoteRef) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let Some(record) = ctx.remote.find_one(target.kind, &[Filter::id(target.id)])? else {
        return skip_remote(ctx, target, "record no longer exists");
    };
    let entity = projection::project(&record, &ctx.config.project_code_field, ctx.mapper.mappings())?;

    let (id, outcome) = match ctx.local_of(&record)? {
        Some(existing) => {
            let changed = ctx.apply_remote_values(&existing.id, &record, &entity.label)?;
            (existing.id, if changed { OutcomeKind::Updated } else { OutcomeKind::Unchanged })
        }
        None => {
            let parent = local_parent_of(ctx, &record)?;
            let local_kind = local_kind_of(record.kind)?;
            let matched = ctx
                .local
                .find_child(parent.as_deref(), local_kind, &entity.name, |e| {
                    e.remote_type() == Some(target.kind)
                        && e.remote_ref().map_or(!e.is_removed(), |r| r == target)
                })
                .map(|e| e.id.clone());
            match matched {
                Some(id) => {
                    ctx.apply_remote_values(&id, &record, &entity.label)?;
                    (id, OutcomeKind::Updated)
                }
                None => {
                    let back_reference = ctx.xref().get(&record).map(str::to_string);
                    let id = ctx.create_local(&record, &entity, parent.as_deref(), back_reference)?;
                    (id, OutcomeKind::Created)
                }
            }
        }
    };

    let mut linked = record;
    ctx.xref()
        .set(&mut ctx.local, &id, &mut linked, SyncStatus::Synced, &mut ctx.report)?;
    ctx.report.record(
        EntityOutcome::new(outcome, linked.to_string())
            .with_local(id)
            .with_remote(target),
    );
    Ok(())
}

/// Local id of the entity a remote record should be created under.
///
/// Ancestors of types that are not synchronized are passed through. A
/// synchronized ancestor without a local counterpart is not ready yet.
fn local_parent_of<R, L>(ctx: &mut RunContext<'_, R, L>, record: &RemoteRecord) -> SyncResult<Option<String>>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let mut current = ctx.resolver.parent_of(record);
    loop {
        match current {
            ParentRef::Project => return Ok(None),
            ParentRef::Local(id) => return Ok(Some(id)),
            ParentRef::Grouping(label) => return Ok(Some(ctx.ensure_local_grouping(&label).0)),
            ParentRef::Remote(parent) => {
                let Some(parent_record) = ctx.remote.find_one(parent.kind, &[Filter::id(parent.id)])? else {
                    return Ok(None);
                };
                if !ctx.resolver.is_enabled(parent.kind) {
                    current = ctx.resolver.parent_of(&parent_record);
                    continue;
                }
                return match ctx.local_of(&parent_record)? {
                    Some(local) => Ok(Some(local.id)),
                    None => Err(SyncError::ParentNotReady {
                        entity: record.to_string(),
                        parent: parent.to_string(),
                    }),
                };
            }
        }
    }
}

fn remote_attribute_changed<R, L>(
    ctx: &mut RunContext<'_, R, L>,
    target: RemoteRef,
    attribute: &str,
    new_value: &Value,
) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let label = attribute == label_field(target.kind);
    let mapping = ctx.mapper.mapping_for_remote_field(attribute, target.kind).cloned();
    if !label && mapping.is_none() {
        warn!(remote = %target, attribute, "change to an unsynchronized field ignored");
        return skip_remote(ctx, target, "field is not synchronized");
    }

    let Some(record) = ctx.remote.find_one(target.kind, &[Filter::id(target.id)])? else {
        return skip_remote(ctx, target, "record no longer exists");
    };
    let Some(local) = ctx.local_of(&record)? else {
        let reason = SyncError::NotSynchronized(record.to_string()).to_string();
        return skip_remote(ctx, target, &reason);
    };
    check_link(&local, target)?;

    let changed = match mapping {
        None => {
            let value = new_value
                .as_str()
                .or_else(|| record.str_field(attribute))
                .unwrap_or_default()
                .to_string();
            !value.is_empty() && ctx.local.set_label(&local.id, &value)
        }
        Some(mapping) => match ctx
            .mapper
            .value_to_local(ctx.remote, &mut ctx.cache, &mapping, new_value)?
        {
            Some(value) => ctx.local.set_attribute(&local.id, &mapping.local, value),
            None => false,
        },
    };
    ctx.report.record(
        EntityOutcome::new(
            if changed { OutcomeKind::Updated } else { OutcomeKind::Unchanged },
            local.describe(),
        )
        .with_local(&local.id)
        .with_remote(target),
    );
    Ok(())
}

fn remote_retired<R, L>(ctx: &mut RunContext<'_, R, L>, target: RemoteRef) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let local = match ctx.remote.find_retired(target.kind, target.id)? {
        Some(record) => ctx.local_of(&record)?,
        None => ctx
            .local
            .entities()
            .find(|e| e.remote_ref() == Some(target))
            .cloned(),
    };
    let Some(local) = local else {
        return skip_remote(ctx, target, "not synchronized");
    };
    check_link(&local, target)?;

    if local.immutable {
        ctx.xref().mark_removed_local(&mut ctx.local, &local.id);
        info!(local_id = %local.id, remote = %target, "entity has dependents, marked removed");
        ctx.report.record(
            EntityOutcome::new(OutcomeKind::Skipped, local.describe())
                .with_local(&local.id)
                .with_remote(target)
                .with_reason("has dependents, marked removed"),
        );
    } else {
        ctx.local.delete(&local.id);
        ctx.report.record(
            EntityOutcome::new(OutcomeKind::Deleted, local.describe())
                .with_local(&local.id)
                .with_remote(target),
        );
    }
    Ok(())
}

/// An entity already linked to another record must not be repointed.
fn check_link(local: &LocalEntity, target: RemoteRef) -> SyncResult<()> {
    match local.remote_ref() {
        Some(current) if current != target => Err(SyncError::CrossReferenceMismatch {
            entity: local.describe(),
            expected: current.to_string(),
            found: target.to_string(),
        }),
        _ => Ok(()),
    }
}

fn apply_local<R, L>(ctx: &mut RunContext<'_, R, L>, change: &LocalChange) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    if change.topic.action == LocalAction::Deleted {
        return local_deleted(ctx, change);
    }
    let Some(entity) = ctx.local.get_or_query(ctx.hub, &change.entity_id)? else {
        return skip_local(ctx, &change.entity_id, "entity no longer exists");
    };
    let Some(kind) = entity.remote_type().filter(|k| ctx.resolver.is_enabled(*k)) else {
        return skip_local(ctx, &entity.describe(), "type is not synchronized");
    };
    if entity.is_removed() {
        return skip_local(ctx, &entity.describe(), "marked removed");
    }

    match change.topic.action {
        LocalAction::Created => local_created(ctx, &entity, kind),
        LocalAction::Renamed | LocalAction::LabelChanged => {
            let mut fields = Fields::new();
            fields.insert(label_field(kind).to_string(), Value::String(entity.label.clone()));
            update_linked(ctx, &entity, fields)
        }
        LocalAction::AttribChanged
        | LocalAction::StatusChanged
        | LocalAction::TagsChanged
        | LocalAction::AssigneesChanged => {
            let changed = changed_attributes(change);
            let mut fields = Fields::new();
            for (key, value) in &changed {
                let Some(mapping) = ctx.mapper.mapping_for_local(key, kind).cloned() else {
                    warn!(local_id = %entity.id, attribute = %key, "change to an unmapped attribute ignored");
                    continue;
                };
                if let Some((field, converted)) =
                    ctx.mapper
                        .value_to_remote(ctx.remote, &mut ctx.cache, &mapping, kind, value)?
                {
                    fields.insert(field, converted);
                }
            }
            if fields.is_empty() {
                return skip_local(ctx, &entity.describe(), "no mapped attribute changed");
            }
            update_linked(ctx, &entity, fields)
        }
        LocalAction::Deleted => Ok(()),
    }
}

/// Attribute values carried by a change event.
fn changed_attributes(change: &LocalChange) -> Attributes {
    let single = |key: &str| Attributes::from([(key.to_string(), change.new_value.clone())]);
    match change.topic.action {
        LocalAction::StatusChanged => single(STATUS_ATTRIB),
        LocalAction::TagsChanged => single(TAGS_ATTRIB),
        LocalAction::AssigneesChanged => single(ASSIGNEES_ATTRIB),
        _ => change
            .new_value
            .as_object()
            .map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    }
}

fn skip_local<R, L>(ctx: &mut RunContext<'_, R, L>, entity: &str, reason: &str) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    debug!(entity, reason, "skipping local event");
    ctx.report
        .record(EntityOutcome::new(OutcomeKind::Skipped, entity).with_reason(reason));
    Ok(())
}

fn local_created<R, L>(ctx: &mut RunContext<'_, R, L>, entity: &LocalEntity, kind: RemoteType) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    if let Some(target) = entity.remote_ref() {
        if ctx.remote.find_one(target.kind, &[Filter::id(target.id)])?.is_some() {
            return skip_local(ctx, &entity.describe(), "already synchronized");
        }
    }
    let parent = ctx.remote_parent_of(entity)?;
    let (mut record, outcome) = match find_remote_sibling(ctx, entity, kind, &parent)? {
        Some(record) => (record, OutcomeKind::Updated),
        None => (ctx.create_remote(entity, kind, &parent)?, OutcomeKind::Created),
    };
    ctx.xref()
        .set(&mut ctx.local, &entity.id, &mut record, SyncStatus::Synced, &mut ctx.report)?;
    ctx.report.record(
        EntityOutcome::new(outcome, entity.describe())
            .with_local(&entity.id)
            .with_remote(record.to_ref()),
    );
    Ok(())
}

/// An unlinked remote record with the entity's name under the same parent.
fn find_remote_sibling<R, L>(
    ctx: &mut RunContext<'_, R, L>,
    entity: &LocalEntity,
    kind: RemoteType,
    parent: &RemoteParent,
) -> SyncResult<Option<RemoteRecord>>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let candidates = ctx
        .remote
        .find(kind, &[Filter::link(PROJECT_FIELD, ctx.remote_project.to_ref())])?;
    let code_field = ctx.config.project_code_field.as_str();
    Ok(candidates.into_iter().find(|record| {
        record_name(record, code_field).is_some_and(|name| same_slug(&name, &entity.name))
            && ctx.xref().get(record).map_or(true, |id| id == entity.id)
            && same_parent(ctx, record, parent)
    }))
}

fn same_parent<R, L>(ctx: &RunContext<'_, R, L>, record: &RemoteRecord, parent: &RemoteParent) -> bool
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    match (ctx.resolver.parent_of(record), parent) {
        (ParentRef::Project, RemoteParent::Project) => true,
        (ParentRef::Remote(found), RemoteParent::Record(expected)) => found == *expected,
        (ParentRef::Grouping(found), RemoteParent::Grouping(expected)) => slug_key(&found) == slug_key(expected),
        _ => false,
    }
}

/// Writes fields to the counterpart of a linked entity.
fn update_linked<R, L>(ctx: &mut RunContext<'_, R, L>, entity: &LocalEntity, mut fields: Fields) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let Some(target) = entity.remote_ref() else {
        let reason = SyncError::NotSynchronized(entity.describe()).to_string();
        return skip_local(ctx, &entity.describe(), &reason);
    };
    let Some(record) = ctx.remote.find_one(target.kind, &[Filter::id(target.id)])? else {
        return skip_local(ctx, &entity.describe(), "counterpart no longer exists");
    };
    if let Some(owner) = ctx.xref().get(&record) {
        if owner != entity.id {
            return Err(SyncError::CrossReferenceMismatch {
                entity: entity.describe(),
                expected: entity.id.clone(),
                found: owner.to_string(),
            });
        }
    }

    fields.retain(|field, value| record.get(field) != Some(&*value));
    let outcome = if fields.is_empty() {
        OutcomeKind::Unchanged
    } else {
        ctx.remote.update(target.kind, target.id, &fields)?;
        debug!(remote = %target, fields = fields.len(), "updated remote record");
        OutcomeKind::Updated
    };
    ctx.report.record(
        EntityOutcome::new(outcome, entity.describe())
            .with_local(&entity.id)
            .with_remote(target),
    );
    Ok(())
}

fn local_deleted<R, L>(ctx: &mut RunContext<'_, R, L>, change: &LocalChange) -> SyncResult<()>
where
    R: RemoteClient + ?Sized,
    L: LocalHub + ?Sized,
{
    let Some(target) = change.remote else {
        return skip_local(ctx, &change.entity_id, "not synchronized");
    };
    let Some(mut record) = ctx.remote.find_one(target.kind, &[Filter::id(target.id)])? else {
        return skip_local(ctx, &change.entity_id, "counterpart already gone");
    };
    if let Some(owner) = ctx.xref().get(&record) {
        if owner != change.entity_id {
            return Err(SyncError::CrossReferenceMismatch {
                entity: change.entity_id.clone(),
                expected: change.entity_id.clone(),
                found: owner.to_string(),
            });
        }
    }

    let outcome = if ctx.has_remote_dependents(target)? {
        ctx.xref().mark_removed_remote(&mut record, &mut ctx.report);
        info!(remote = %target, "remote record has dependents, marked removed");
        EntityOutcome::new(OutcomeKind::Skipped, target.to_string()).with_reason("has dependents, marked removed")
    } else {
        ctx.remote.delete(target.kind, target.id)?;
        EntityOutcome::new(OutcomeKind::Deleted, target.to_string())
    };
    ctx.report
        .record(outcome.with_local(&change.entity_id).with_remote(target));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_model::LocalTopic;
    use serde_json::json;

    fn change(topic: &str, new_value: Value) -> LocalChange {
        LocalChange {
            topic: LocalTopic::parse(topic).unwrap(),
            project: "demo".into(),
            entity_id: "f1".into(),
            old_value: Value::Null,
            new_value,
            remote: None,
        }
    }

    #[test]
    fn builtin_changes_map_to_their_attribute() {
        let attrs = changed_attributes(&change("entity.task.status_changed", json!("Final")));
        assert_eq!(attrs.get(STATUS_ATTRIB), Some(&json!("Final")));

        let attrs = changed_attributes(&change("entity.task.assignees_changed", json!(["ana"])));
        assert_eq!(attrs.get(ASSIGNEES_ATTRIB), Some(&json!(["ana"])));
    }

    #[test]
    fn attrib_changes_carry_every_key() {
        let attrs = changed_attributes(&change(
            "entity.folder.attrib_changed",
            json!({"fps": 24, "resolutionWidth": 1920}),
        ));
        assert_eq!(attrs.len(), 2);
        assert!(changed_attributes(&change("entity.folder.attrib_changed", json!("x"))).is_empty());
    }

    #[test]
    fn links_are_never_repointed() {
        let entity = LocalEntity::folder("f1", None, "Shot", "sh010")
            .with_attribute("remoteId", "4")
            .with_attribute("remoteType", "Shot");
        assert!(check_link(&entity, RemoteRef::new(RemoteType::Shot, 4)).is_ok());
        assert!(matches!(
            check_link(&entity, RemoteRef::new(RemoteType::Shot, 5)),
            Err(SyncError::CrossReferenceMismatch { .. })
        ));
        let unlinked = LocalEntity::folder("f2", None, "Shot", "sh020");
        assert!(check_link(&unlinked, RemoteRef::new(RemoteType::Shot, 5)).is_ok());
    }

    #[test]
    fn rejected_reactions_carry_the_reason() {
        let reaction = Reaction::rejected("demo", "automatic synchronization is disabled");
        assert_eq!(reaction.state, ReactorState::Rejected);
        assert!(!reaction.is_committed());
        assert!(reaction.report.outcomes.is_empty());
    }
}
