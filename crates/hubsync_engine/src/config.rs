//! Configuration for the reconciliation engine.

use hubsync_model::{FieldDataType, RemoteType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Local attribute carrying the status name.
pub const STATUS_ATTRIB: &str = "status";
/// Local attribute carrying tag names.
pub const TAGS_ATTRIB: &str = "tags";
/// Local attribute carrying assignee logins.
pub const ASSIGNEES_ATTRIB: &str = "assignees";

/// Configuration for synchronization runs.
///
/// Deserializable from JSON; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote service URL.
    pub server_url: String,
    /// Script (API user) name used to authenticate.
    pub script_name: String,
    /// API key paired with the script name.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Seconds between polls of the remote event log.
    pub polling_interval_secs: u64,
    /// Remote project field the local project name is derived from.
    pub project_code_field: String,
    /// Remote types reconciled by this deployment.
    pub enabled_entities: Vec<RemoteType>,
    /// Custom attribute mappings, merged over the built-in ones.
    pub attribute_map: Vec<AttributeMapping>,
    /// Retry configuration for re-enqueued work.
    #[serde(skip)]
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given remote service.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            script_name: String::new(),
            api_key: String::new(),
            polling_interval_secs: 10,
            project_code_field: "code".to_string(),
            enabled_entities: vec![
                RemoteType::Episode,
                RemoteType::Sequence,
                RemoteType::Shot,
                RemoteType::Asset,
                RemoteType::Task,
                RemoteType::Version,
            ],
            attribute_map: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the script credentials.
    pub fn with_credentials(mut self, script_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self.api_key = api_key.into();
        self
    }

    /// Sets the polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_secs = interval.as_secs();
        self
    }

    /// Sets the project code field.
    pub fn with_project_code_field(mut self, field: impl Into<String>) -> Self {
        self.project_code_field = field.into();
        self
    }

    /// Replaces the enabled remote types.
    pub fn with_enabled_entities(mut self, types: impl IntoIterator<Item = RemoteType>) -> Self {
        self.enabled_entities = types.into_iter().collect();
        self
    }

    /// Adds a custom attribute mapping.
    pub fn with_attribute(mut self, mapping: AttributeMapping) -> Self {
        self.attribute_map.push(mapping);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Polling interval as a duration.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Returns true if the remote type takes part in synchronization.
    pub fn is_enabled(&self, kind: RemoteType) -> bool {
        self.enabled_entities.contains(&kind)
    }

    /// Built-in mappings followed by the configured ones.
    ///
    /// A configured mapping replaces a built-in one with the same local name.
    pub fn attribute_mappings(&self) -> Vec<AttributeMapping> {
        let mut mappings: Vec<AttributeMapping> = AttributeMapping::builtin()
            .into_iter()
            .filter(|b| !self.attribute_map.iter().any(|m| m.local == b.local))
            .collect();
        mappings.extend(self.attribute_map.iter().cloned());
        mappings
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Value type of a mapped attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Whole number.
    Integer,
    /// Floating point number.
    Float,
    /// Free text.
    Text,
    /// Boolean.
    Boolean,
    /// ISO-8601 date or timestamp.
    Datetime,
    /// List of values, or a choice from a list.
    List,
}

impl AttributeType {
    /// Returns true if `value` has this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            AttributeType::Integer => value.is_i64() || value.is_u64(),
            AttributeType::Float => value.is_number(),
            AttributeType::Text | AttributeType::Datetime => value.is_string(),
            AttributeType::Boolean => value.is_boolean(),
            AttributeType::List => value.is_array() || value.is_string(),
        }
    }

    /// Returns true if a remote field of `data_type` can hold this type.
    pub fn fits(self, data_type: FieldDataType) -> bool {
        match self {
            AttributeType::Integer => data_type == FieldDataType::Number,
            AttributeType::Float => matches!(data_type, FieldDataType::Float | FieldDataType::Number),
            AttributeType::Text => matches!(
                data_type,
                FieldDataType::Text | FieldDataType::StatusList | FieldDataType::List
            ),
            AttributeType::Boolean => data_type == FieldDataType::Checkbox,
            AttributeType::Datetime => {
                matches!(data_type, FieldDataType::Date | FieldDataType::DateTime)
            }
            AttributeType::List => matches!(
                data_type,
                FieldDataType::List | FieldDataType::StatusList | FieldDataType::MultiEntity
            ),
        }
    }
}

/// One local attribute ⇄ remote field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Local attribute name.
    pub local: String,
    /// Remote field name, without the reserved prefix.
    pub remote: String,
    /// Value type.
    #[serde(rename = "type")]
    pub value_type: AttributeType,
    /// Remote types the mapping applies to; empty means all.
    #[serde(default)]
    pub scope: Vec<RemoteType>,
}

impl AttributeMapping {
    /// Creates a mapping that applies to every type.
    pub fn new(local: impl Into<String>, remote: impl Into<String>, value_type: AttributeType) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            value_type,
            scope: Vec::new(),
        }
    }

    /// Restricts the mapping to the given remote types.
    pub fn with_scope(mut self, scope: impl IntoIterator<Item = RemoteType>) -> Self {
        self.scope = scope.into_iter().collect();
        self
    }

    /// Returns true if the mapping applies to `kind`.
    pub fn applies_to(&self, kind: RemoteType) -> bool {
        self.scope.is_empty() || self.scope.contains(&kind)
    }

    /// Mappings every deployment has: status, tags and task assignees.
    pub fn builtin() -> Vec<AttributeMapping> {
        vec![
            AttributeMapping::new(STATUS_ATTRIB, "status_list", AttributeType::Text),
            AttributeMapping::new(TAGS_ATTRIB, "tags", AttributeType::List),
            AttributeMapping::new(ASSIGNEES_ATTRIB, "task_assignees", AttributeType::List)
                .with_scope([RemoteType::Task]),
        ]
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Retries immediately, up to `max_attempts` in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::no_retry()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
