//! # hubsync testkit
//!
//! Test utilities for hubsync.
//!
//! This crate provides:
//! - A project provisioned on both sides of an in-memory engine
//! - Property-based hierarchy generators using proptest
//! - Cross-side consistency assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hubsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_are_idempotent() {
//!     let studio = TestStudio::new();
//!     scenarios::local_episode(&studio, 2, 2);
//!     studio.push();
//!     assert_idempotent(&studio, Direction::LocalToRemote);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use hubsync_engine::Direction;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
