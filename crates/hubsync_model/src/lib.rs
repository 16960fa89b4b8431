//! # hubsync model
//!
//! Entity, reference and notification types shared by the hubsync crates.
//!
//! This crate provides:
//! - [`SyncEntity`], the normalized unit exchanged between the local hierarchy
//!   and the remote tracking service
//! - [`RemoteRecord`], [`RemoteRef`] and [`Filter`] for the remote API
//! - [`Notification`], change events parsed from `(topic, payload)` pairs
//! - [`slugify`] and the cross-reference field names
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
pub mod fields;
mod notification;
mod remote;
mod slug;

pub use entity::{Attributes, EntityKind, ParentRef, SyncEntity, SyncStatus};
pub use error::{ModelError, ModelResult};
pub use notification::{
    Envelope, LocalAction, LocalChange, LocalEntityType, LocalTopic, Notification,
    RemoteChange, RemoteEventKind, REMOTE_TOPIC,
};
pub use remote::{
    FieldDataType, FieldSchema, Fields, Filter, RemoteRecord, RemoteRef, RemoteType,
    TrackingSettings,
};
pub use slug::{same_slug, slug_key, slugify};
