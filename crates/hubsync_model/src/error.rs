//! Error types for the hubsync model.

use thiserror::Error;

/// Errors raised while building or validating model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A tag (entity type, topic, status) outside the closed set this crate understands.
    #[error("unsupported {kind}: '{value}'")]
    UnsupportedVariant {
        /// Which family of tags was being parsed.
        kind: &'static str,
        /// The offending value.
        value: String,
    },

    /// A record lacks a field required to classify it.
    #[error("{record} is missing required field '{field}'")]
    MissingField {
        /// Human-readable identification of the record.
        record: String,
        /// Field name.
        field: String,
    },

    /// A field is present but cannot be interpreted.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Why the value was refused.
        reason: String,
    },

    /// Attempt to point an established cross-reference at a different counterpart.
    #[error("refusing to relink {entity}: linked to {current}, attempted {attempted}")]
    Relink {
        /// Entity being relinked.
        entity: String,
        /// Identifier currently stored.
        current: String,
        /// Identifier the caller tried to store.
        attempted: String,
    },

    /// Grouping nodes never carry a remote identifier.
    #[error("grouping node '{name}' cannot carry a remote identifier")]
    GroupingNodeRemote {
        /// Slug of the grouping node.
        name: String,
    },
}

impl ModelError {
    /// Shorthand for [`ModelError::UnsupportedVariant`].
    pub fn unsupported(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnsupportedVariant {
            kind,
            value: value.into(),
        }
    }

    /// Shorthand for [`ModelError::MissingField`].
    pub fn missing(record: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            record: record.into(),
            field: field.into(),
        }
    }
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_variant() {
        let err = ModelError::unsupported("remote type", "Playlist");
        assert_eq!(err.to_string(), "unsupported remote type: 'Playlist'");
    }

    #[test]
    fn display_missing_field() {
        let err = ModelError::missing("Task 12", "step");
        assert!(err.to_string().contains("'step'"));
    }
}
