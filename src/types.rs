/// Core data types shared across the short-term memory components.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Free-form key/value metadata attached to records and conversation turns.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Clamp a caller-supplied score into `[0, 1]`; non-finite input becomes 0.
pub(crate) fn unit_interval(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// An entry in the facade's current-context map.
///
/// Records are keyed by a semantic label ("current_intent", "last_entities",
/// ...) chosen by the caller. They live until the retention window passes
/// without a read, or until `clear_memory()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The semantic label this record is stored under
    pub key: String,

    /// Opaque payload
    pub payload: JsonValue,

    /// When the record was stored
    pub created_at: DateTime<Utc>,

    /// When the record was last stored or retrieved
    pub last_accessed: DateTime<Utc>,

    /// Caller-assigned importance (0.0 - 1.0)
    pub importance: f32,

    /// Caller metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Metadata,
}

impl MemoryRecord {
    /// Create a record stamped at `now`.
    pub fn new(
        key: impl Into<String>,
        payload: JsonValue,
        importance: f32,
        context: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            created_at: now,
            last_accessed: now,
            importance: unit_interval(importance),
            context,
        }
    }

    /// True once the record has gone unread for longer than `retention`.
    pub fn is_stale(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_accessed) > retention
    }
}
