//! CLI command implementations.

pub mod inspect;
pub mod replay;
pub mod sync;
pub mod validate;
