//! # hubsync engine
//!
//! Bidirectional reconciliation of a project hierarchy between a local
//! project hub and a remote production tracking service.
//!
//! This crate provides:
//! - Full-tree synchronization in either direction
//! - Incremental reaction to single change notifications from either side
//! - A cross-reference store linking local ids and remote records
//! - Hierarchy resolution driven by the remote tracking settings
//! - Attribute mapping between local attributes and remote fields
//! - A retrying worker over a notification queue
//! - In-memory clients for both sides
//!
//! ## Architecture
//!
//! Every run opens a context that owns the local working set, a per-run
//! schema cache and the run report. Local mutations are buffered and reach
//! the hub in a single commit at the end; remote writes are immediate.
//!
//! Full-tree passes walk the source tree breadth-first over an explicit
//! queue of `(destination parent, source entity)` pairs, so a child is only
//! processed once its parent exists on the destination side.
//!
//! ## Key Invariants
//!
//! - A linked entity is never re-pointed at another counterpart
//! - Re-running a completed pass creates nothing
//! - Skipped entities do not orphan their descendants
//! - Grouping folders are derived deterministically from their label
//! - A failed commit leaves the local hierarchy unchanged
//! - One run at a time per project

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attributes;
mod client;
mod config;
mod context;
mod engine;
mod error;
mod hierarchy;
mod local;
mod memory_hub;
mod memory_remote;
pub mod projection;
mod reactor;
mod remote_tree;
mod report;
mod schema;
mod tree_sync;
mod validate;
mod worker;
mod xref;

pub use attributes::AttributeMapper;
pub use client::{LocalHub, RemoteClient};
pub use config::{
    AttributeMapping, AttributeType, RetryConfig, SyncConfig, ASSIGNEES_ATTRIB, STATUS_ATTRIB,
    TAGS_ATTRIB,
};
pub use engine::{SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use hierarchy::HierarchyResolver;
pub use local::{
    remote_id_value, ChangeSet, EntityPatch, LocalEntity, LocalKind, LocalProject, LocalTree,
    ProjectPatch, ProjectStatus,
};
pub use memory_hub::{HubSnapshot, MemoryHub, ProjectSnapshot};
pub use memory_remote::{MemoryRemote, RemoteCounters, RemoteSnapshot};
pub use reactor::{Reaction, ReactorState};
pub use remote_tree::{NodeKey, RemoteTree};
pub use report::{EntityOutcome, OutcomeKind, SyncReport};
pub use schema::SchemaCache;
pub use tree_sync::Direction;
pub use validate::{validate_attribute_map, validate_project, ValidationIssue};
pub use worker::{Job, MemoryQueue, NotificationSource, QueuedJob, Worker, WorkerOutcome};
pub use xref::CrossReferenceStore;
