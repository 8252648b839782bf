/// Per-user conversation histories and profiles.
///
/// Each user has a short rolling window of turns (default 10). A user's
/// whole history is dropped once its newest turn is older than the context
/// timeout; there is no partial trimming by age. Idle histories are swept
/// before every read and before every append, so a stale history is never
/// extended or returned.
///
/// Profiles are separate key/value maps merged on update. They are never
/// swept.
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::clock::{SharedClock, SystemClock};
use crate::config::duration_secs;
use crate::lexicon::{NEGATIVE_MARKERS, POSITIVE_MARKERS, TopicBucket, topics_in};
use crate::sweeper::Sweep;
use crate::types::Metadata;

/// Topic buckets reported in conversation summaries.
static SUMMARY_TOPICS: LazyLock<Vec<TopicBucket>> = LazyLock::new(|| {
    vec![
        TopicBucket::new("weather", &["weather"]),
        TopicBucket::new("news", &["news"]),
        TopicBucket::new("help", &["help"]),
        TopicBucket::new("questions", &["question"]),
    ]
});

/// Net tone marker count above which a conversation is positive
/// (and below whose negation it is negative).
const SENTIMENT_MARGIN: i64 = 2;

/// Conversation manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Turns kept per user
    pub max_context_length: usize,

    /// A history whose newest turn is older than this is dropped
    #[serde(rename = "context_timeout_secs", with = "duration_secs")]
    pub context_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_context_length: 10,
            context_timeout: Duration::hours(1),
        }
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl AsRef<str> for ConversationTurn {
    fn as_ref(&self) -> &str {
        &self.content
    }
}

/// Overall tone of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    fn from_net(net: i64) -> Self {
        if net > SENTIMENT_MARGIN {
            Sentiment::Positive
        } else if net < -SENTIMENT_MARGIN {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

/// Digest of a user's current history.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub message_count: usize,
    pub last_message_time: DateTime<Utc>,
    pub topics: Vec<String>,
    pub sentiment: Sentiment,
}

/// Conversation manager statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub active_users: usize,
    pub total_turns: usize,
    pub profiles: usize,
}

/// Holds recent conversation turns and profiles per user.
#[derive(Debug)]
pub struct ConversationManager {
    config: ConversationConfig,
    clock: SharedClock,
    histories: DashMap<String, VecDeque<ConversationTurn>>,
    profiles: DashMap<String, Metadata>,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::with_config(ConversationConfig::default())
    }

    pub fn with_config(config: ConversationConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: ConversationConfig, clock: SharedClock) -> Self {
        let config = ConversationConfig {
            max_context_length: config.max_context_length.max(1),
            ..config
        };
        Self {
            config,
            clock,
            histories: DashMap::new(),
            profiles: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Append a turn to a user's history, dropping the oldest beyond the limit.
    pub fn add_message(
        &self,
        user_id: &str,
        content: impl Into<String>,
        role: Role,
        metadata: Option<Metadata>,
    ) {
        self.sweep_idle();

        let turn = ConversationTurn {
            role,
            content: content.into(),
            timestamp: self.clock.now(),
            metadata: metadata.unwrap_or_default(),
        };

        let mut history = self.histories.entry(user_id.to_string()).or_default();
        history.push_back(turn);
        while history.len() > self.config.max_context_length {
            history.pop_front();
        }
        debug!(user = user_id, %role, turns = history.len(), "Message added");
    }

    /// The most recent turns for a user, oldest first.
    ///
    /// `max_messages` limits the result to the last `n` turns.
    pub fn get_context(&self, user_id: &str, max_messages: Option<usize>) -> Vec<ConversationTurn> {
        self.sweep_idle();

        let Some(history) = self.histories.get(user_id) else {
            return Vec::new();
        };
        let skip = max_messages.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    /// Drop a user's history. Returns false if there was none.
    pub fn clear_context(&self, user_id: &str) -> bool {
        let cleared = self.histories.remove(user_id).is_some();
        if cleared {
            info!(user = user_id, "Conversation context cleared");
        }
        cleared
    }

    /// Merge `data` into the user's profile, key by key.
    pub fn update_user_profile(&self, user_id: &str, data: Metadata) {
        let mut profile = self.profiles.entry(user_id.to_string()).or_default();
        profile.extend(data);
        debug!(user = user_id, keys = profile.len(), "Profile updated");
    }

    /// The user's profile, empty if none was stored.
    pub fn get_user_profile(&self, user_id: &str) -> Metadata {
        self.profiles
            .get(user_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Summary of a user's current history, `None` if there is none.
    pub fn get_summary(&self, user_id: &str) -> Option<ConversationSummary> {
        let turns = self.get_context(user_id, None);
        let last = turns.last()?;

        let mut topics: Vec<String> = Vec::new();
        let mut net = 0i64;
        for turn in &turns {
            for topic in topics_in(&SUMMARY_TOPICS, &turn.content) {
                if !topics.iter().any(|t| t == topic) {
                    topics.push(topic.to_string());
                }
            }
            net += POSITIVE_MARKERS.count(&turn.content) as i64;
            net -= NEGATIVE_MARKERS.count(&turn.content) as i64;
        }

        Some(ConversationSummary {
            user_id: user_id.to_string(),
            message_count: turns.len(),
            last_message_time: last.timestamp,
            topics,
            sentiment: Sentiment::from_net(net),
        })
    }

    /// Drop every history whose newest turn is older than the timeout.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.config.context_timeout;
        let before = self.histories.len();

        self.histories.retain(|_, history| {
            history
                .back()
                .is_some_and(|turn| now.signed_duration_since(turn.timestamp) <= timeout)
        });

        let removed = before.saturating_sub(self.histories.len());
        if removed > 0 {
            info!(removed, "Expired idle conversations");
        }
        removed
    }

    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            active_users: self.histories.len(),
            total_turns: self.histories.iter().map(|h| h.len()).sum(),
            profiles: self.profiles.len(),
        }
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweep for ConversationManager {
    fn name(&self) -> &'static str {
        "conversations"
    }

    fn sweep(&self) -> usize {
        self.sweep_idle()
    }
}
