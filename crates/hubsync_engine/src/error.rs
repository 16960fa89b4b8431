//! Error types for the reconciliation engine.

use hubsync_model::ModelError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling the two systems.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A condition required before any work can start does not hold.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The destination-side parent does not exist yet.
    #[error("parent of {entity} is not materialized yet: {parent}")]
    ParentNotReady {
        /// Entity waiting for its parent.
        entity: String,
        /// The missing parent.
        parent: String,
    },

    /// The two sides disagree about who an entity's counterpart is.
    #[error("cross-reference mismatch on {entity}: expected {expected}, found {found}")]
    CrossReferenceMismatch {
        /// Entity whose link is inconsistent.
        entity: String,
        /// Counterpart recorded on the entity.
        expected: String,
        /// Counterpart recorded on the other side.
        found: String,
    },

    /// An entity cannot be mapped onto the other system's types.
    #[error("cannot classify {entity}: {reason}")]
    Unclassifiable {
        /// Entity description.
        entity: String,
        /// What is missing.
        reason: String,
    },

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity has no counterpart on the other side yet.
    #[error("{0} has not been synchronized yet")]
    NotSynchronized(String),

    /// Network or transport error talking to the remote service.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote service refused a request.
    #[error("remote service rejected request: {0}")]
    Remote(String),

    /// The local buffered commit failed; nothing was applied.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Another run holds the project.
    #[error("project '{0}' is already being synchronized")]
    ProjectBusy(String),

    /// The run was cancelled between queue items.
    #[error("synchronization cancelled")]
    Cancelled,

    /// Malformed model value.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Shorthand for [`SyncError::Precondition`].
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }

    /// Returns true if the caller should re-enqueue the work.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ParentNotReady { .. } => true,
            SyncError::Commit(_) => true,
            SyncError::ProjectBusy(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error ends the whole pass rather than one entity.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. }
                | SyncError::Commit(_)
                | SyncError::Cancelled
                | SyncError::Precondition(_)
                | SyncError::ProjectBusy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad credentials").is_retryable());
        assert!(SyncError::ParentNotReady {
            entity: "Task 'anim'".into(),
            parent: "Shot#4".into(),
        }
        .is_retryable());
        assert!(SyncError::Commit("conflict".into()).is_retryable());
        assert!(!SyncError::precondition("auto sync disabled").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn per_entity_errors_do_not_abort() {
        assert!(!SyncError::Unclassifiable {
            entity: "Task 'x'".into(),
            reason: "no step".into(),
        }
        .aborts_pass());
        assert!(!SyncError::Remote("field not editable".into()).aborts_pass());
        assert!(SyncError::transport_retryable("timeout").aborts_pass());
        assert!(SyncError::Cancelled.aborts_pass());
    }

    #[test]
    fn model_errors_convert() {
        let err: SyncError = ModelError::unsupported("remote type", "Playlist").into();
        assert!(matches!(err, SyncError::Model(_)));
        assert!(!err.is_retryable());
    }
}
