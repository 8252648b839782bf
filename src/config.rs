//! Configuration for the short-term memory facade.
//!
//! Each component owns its config struct (`CacheConfig` lives next to the
//! cache, and so on). [`MemoryConfig`] composes them with the facade's own
//! settings. Every struct has sensible defaults and deserializes from
//! partial JSON; durations are written as whole seconds (`*_secs` fields).

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::attention::AttentionConfig;
use crate::conversation::ConversationConfig;
use crate::error::{StmError, StmResult};
use crate::memory::{BufferConfig, CacheConfig, WorkingMemoryConfig};

/// Top-level configuration handed to [`crate::ShortTermMemory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Cache subsystem
    pub cache: CacheConfig,

    /// Working memory
    pub working: WorkingMemoryConfig,

    /// Named buffers
    pub buffers: BufferConfig,

    /// Attention mechanism
    pub attention: AttentionConfig,

    /// Conversation histories
    pub conversation: ConversationConfig,

    /// How long a current-context record survives without being read
    #[serde(rename = "context_retention_secs", with = "duration_secs")]
    pub context_retention: Duration,

    /// Start periodic sweep tasks on `initialize()`
    pub background_sweeps: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            working: WorkingMemoryConfig::default(),
            buffers: BufferConfig::default(),
            attention: AttentionConfig::default(),
            conversation: ConversationConfig::default(),
            context_retention: Duration::hours(1),
            background_sweeps: true,
        }
    }
}

impl MemoryConfig {
    /// Check that every value is usable.
    pub fn validate(&self) -> StmResult<()> {
        if self.cache.max_size == 0 {
            return Err(StmError::invalid_config("cache.max_size must be at least 1"));
        }
        if self.working.max_size == 0 {
            return Err(StmError::invalid_config("working.max_size must be at least 1"));
        }
        if self.buffers.default_capacity == 0 {
            return Err(StmError::invalid_config(
                "buffers.default_capacity must be at least 1",
            ));
        }
        if self.conversation.max_context_length == 0 {
            return Err(StmError::invalid_config(
                "conversation.max_context_length must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.attention.threshold) {
            return Err(StmError::invalid_config(
                "attention.threshold must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.attention.decay_rate) {
            return Err(StmError::invalid_config(
                "attention.decay_rate must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.attention.blend_weight) {
            return Err(StmError::invalid_config(
                "attention.blend_weight must be within [0, 1]",
            ));
        }

        let spans = [
            ("cache.default_ttl", self.cache.default_ttl),
            ("cache.cleanup_interval", self.cache.cleanup_interval),
            ("working.cleanup_interval", self.working.cleanup_interval),
            ("buffers.idle_timeout", self.buffers.idle_timeout),
            ("buffers.cleanup_interval", self.buffers.cleanup_interval),
            ("conversation.context_timeout", self.conversation.context_timeout),
            ("context_retention", self.context_retention),
        ];
        for (name, span) in spans {
            if span <= Duration::zero() {
                return Err(StmError::invalid_config(format!("{name} must be positive")));
            }
        }

        Ok(())
    }
}

/// Serde adapter for `chrono::Duration` as whole seconds.
pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(span: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(span.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| D::Error::custom(format!("{secs} seconds is out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.cache.default_ttl.num_seconds(), 300);
        assert_eq!(config.working.max_size, 100);
        assert_eq!(config.buffers.default_capacity, 100);
        assert_eq!(config.buffers.idle_timeout.num_hours(), 1);
        assert_eq!(config.attention.threshold, 0.7);
        assert_eq!(config.attention.decay_rate, 0.1);
        assert_eq!(config.attention.blend_weight, 0.5);
        assert_eq!(config.conversation.max_context_length, 10);
        assert_eq!(config.context_retention.num_hours(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: MemoryConfig = serde_json::from_value(json!({
            "cache": { "max_size": 5, "default_ttl_secs": 10 },
            "context_retention_secs": 120
        }))
        .unwrap();

        assert_eq!(config.cache.max_size, 5);
        assert_eq!(config.cache.default_ttl, Duration::seconds(10));
        assert_eq!(config.cache.cleanup_interval, CacheConfig::default().cleanup_interval);
        assert_eq!(config.context_retention, Duration::seconds(120));
        assert_eq!(config.working.max_size, 100);
    }

    #[test]
    fn test_round_trips_as_seconds() {
        let value = serde_json::to_value(MemoryConfig::default()).unwrap();
        assert_eq!(value["context_retention_secs"], 3600);
        assert_eq!(value["cache"]["default_ttl_secs"], 300);
        let back: MemoryConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.context_retention, Duration::hours(1));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MemoryConfig::default();
        config.cache.max_size = 0;
        assert!(matches!(config.validate(), Err(StmError::InvalidConfig { .. })));

        let mut config = MemoryConfig::default();
        config.attention.decay_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = MemoryConfig::default();
        config.attention.blend_weight = -0.1;
        assert!(config.validate().is_err());

        let mut config = MemoryConfig::default();
        config.context_retention = Duration::zero();
        assert!(config.validate().is_err());
    }
}
