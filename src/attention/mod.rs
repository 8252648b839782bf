//! Attention: salience scoring and per-entity focus tracking.
//!
//! [`scorer`] turns free text into a score in `[0, 1]`. The
//! [`AttentionMechanism`] keeps one score per tracked entity (a user, a
//! topic, an intent) and answers which entities are currently in focus.
//!
//! Updating an entity first decays its previous score by one step of
//! `decay_rate`, then blends the new score in with weight `blend_weight`.
//! Decay is per update call rather than per unit of wall-clock time, so an
//! entity that is never updated keeps its score. A weight of 1.0 makes the
//! latest signal win outright.

pub mod scorer;

pub use scorer::{AttentionScore, KeywordCategory, ScoreFactor, score_text};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::clock::{SharedClock, SystemClock};
use crate::types::{Metadata, unit_interval};

/// Attention mechanism configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Scores at or above this are "in focus"
    pub threshold: f32,

    /// Fraction of the previous score lost on each update
    pub decay_rate: f32,

    /// Share of the stored score taken from the incoming signal
    pub blend_weight: f32,

    /// Maximum update history entries kept
    pub history_cap: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            decay_rate: 0.1,
            blend_weight: 0.5,
            history_cap: 1000,
        }
    }
}

/// Current attention state of one entity.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionRecord {
    pub entity_id: String,
    pub score: f32,
    pub last_update: DateTime<Utc>,
    pub update_count: u64,
}

/// One entry in the update history.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionUpdate {
    pub entity_id: String,

    /// The incoming score, after clamping
    pub score: f32,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Tracks attention scores for entities.
#[derive(Debug)]
pub struct AttentionMechanism {
    config: AttentionConfig,
    clock: SharedClock,
    scores: DashMap<String, AttentionRecord>,
    history: Mutex<VecDeque<AttentionUpdate>>,
}

impl AttentionMechanism {
    /// Create with default configuration.
    pub fn new() -> Self {
        Self::with_config(AttentionConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: AttentionConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create reading time from `clock`.
    pub fn with_clock(config: AttentionConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            scores: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<AttentionUpdate>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Salience of `text` in `[0, 1]`.
    pub fn score(&self, text: &str, metadata: Option<&Metadata>) -> f32 {
        score_text(text, metadata).score
    }

    /// Salience of `text` with its factor breakdown.
    pub fn score_breakdown(&self, text: &str, metadata: Option<&Metadata>) -> AttentionScore {
        score_text(text, metadata)
    }

    /// Record a new attention signal for `entity_id`.
    ///
    /// Returns the stored score. Non-finite input counts as 0.
    pub fn update(&self, entity_id: &str, score: f32, context: Option<&str>) -> f32 {
        let now = self.clock.now();
        let incoming = unit_interval(score);
        let decay_rate = self.config.decay_rate;
        let blend_weight = self.config.blend_weight;

        // Shard lock is released before the history lock is taken
        let stored = {
            let mut record = self
                .scores
                .entry(entity_id.to_string())
                .or_insert_with(|| AttentionRecord {
                    entity_id: entity_id.to_string(),
                    score: 0.0,
                    last_update: now,
                    update_count: 0,
                });
            record.score = if record.update_count == 0 {
                incoming
            } else {
                let decayed = record.score - record.score * decay_rate;
                unit_interval(decayed * (1.0 - blend_weight) + incoming * blend_weight)
            };
            record.last_update = now;
            record.update_count += 1;
            record.score
        };

        let mut history = self.history_guard();
        history.push_back(AttentionUpdate {
            entity_id: entity_id.to_string(),
            score: incoming,
            timestamp: now,
            context: context.map(str::to_string),
        });
        while history.len() > self.config.history_cap {
            history.pop_front();
        }
        drop(history);

        debug!(entity = entity_id, incoming, stored, "Attention updated");
        stored
    }

    /// Up to `n` focused entities, highest score first.
    pub fn top_focus(&self, n: usize) -> Vec<(String, f32)> {
        let mut focused: Vec<(String, f32)> = self
            .scores
            .iter()
            .filter(|r| r.score >= self.config.threshold)
            .map(|r| (r.key().clone(), r.score))
            .collect();

        focused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        focused.truncate(n);
        focused
    }

    /// True if the entity's score is at or above the threshold.
    pub fn is_focused(&self, entity_id: &str) -> bool {
        self.scores
            .get(entity_id)
            .is_some_and(|r| r.score >= self.config.threshold)
    }

    /// Current record for an entity.
    pub fn record(&self, entity_id: &str) -> Option<AttentionRecord> {
        self.scores.get(entity_id).map(|r| r.clone())
    }

    /// Stop tracking an entity. Returns false if it was not tracked.
    pub fn forget(&self, entity_id: &str) -> bool {
        self.scores.remove(entity_id).is_some()
    }

    /// Update history, oldest first.
    pub fn history(&self) -> Vec<AttentionUpdate> {
        self.history_guard().iter().cloned().collect()
    }

    /// Share of turns mentioning each focus topic.
    ///
    /// A topic counts once per turn; counts are divided by the number of
    /// turns. An empty conversation yields an empty map.
    pub fn analyze_conversation_focus<I, T>(&self, turns: I) -> BTreeMap<String, f32>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;

        for turn in turns {
            total += 1;
            for topic in scorer::focus_topics(turn.as_ref()) {
                *counts.entry(topic.to_string()).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .map(|(topic, count)| (topic, count as f32 / total as f32))
            .collect()
    }

    /// Snapshot of the tracked state.
    pub fn stats(&self) -> AttentionStats {
        let mut tracked = 0usize;
        let mut focused = 0usize;
        let mut sum = 0.0f32;

        for record in self.scores.iter() {
            tracked += 1;
            sum += record.score;
            if record.score >= self.config.threshold {
                focused += 1;
            }
        }

        AttentionStats {
            tracked_entities: tracked,
            currently_focused: focused,
            threshold: self.config.threshold,
            average_attention: if tracked == 0 { 0.0 } else { sum / tracked as f32 },
            history_size: self.history_guard().len(),
        }
    }
}

impl Default for AttentionMechanism {
    fn default() -> Self {
        Self::new()
    }
}

/// Attention statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionStats {
    pub tracked_entities: usize,
    pub currently_focused: usize,
    pub threshold: f32,
    pub average_attention: f32,
    pub history_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_first_update_stores_score() {
        let attention = AttentionMechanism::new();
        assert!(approx(attention.update("user:1", 0.8, None), 0.8));
        assert!(attention.is_focused("user:1"));
        assert!(!attention.is_focused("user:2"));
    }

    #[test]
    fn test_update_decays_then_blends() {
        let attention = AttentionMechanism::new();
        attention.update("topic", 0.9, None);

        // (0.9 * 0.9) * 0.5 + 0.1 * 0.5
        assert!(approx(attention.update("topic", 0.1, None), 0.455));
        assert!(!attention.is_focused("topic"));
    }

    #[test]
    fn test_low_signal_drops_entity_out_of_focus() {
        let attention = AttentionMechanism::new();
        attention.update("user:1", 0.95, None);
        assert!(attention.is_focused("user:1"));

        let stored = attention.update("user:1", 0.0, Some("resolved"));
        assert!(approx(stored, 0.4275));
        assert!(!attention.is_focused("user:1"));
        assert!(attention.top_focus(5).is_empty());
    }

    #[test]
    fn test_repeated_strong_signal_builds_focus() {
        let attention = AttentionMechanism::new();
        attention.update("topic", 0.2, None);
        assert!(approx(attention.update("topic", 0.95, None), 0.565));
        assert!(!attention.is_focused("topic"));
        assert!(approx(attention.update("topic", 0.95, None), 0.72925));
        assert!(attention.is_focused("topic"));
        assert_eq!(attention.record("topic").unwrap().update_count, 3);
    }

    #[test]
    fn test_full_blend_weight_keeps_latest_signal() {
        let attention = AttentionMechanism::with_config(AttentionConfig {
            blend_weight: 1.0,
            ..Default::default()
        });
        attention.update("topic", 0.95, None);
        assert!(approx(attention.update("topic", 0.3, None), 0.3));
        assert!(approx(attention.update("topic", 0.8, None), 0.8));
    }

    #[test]
    fn test_scores_are_clamped() {
        let attention = AttentionMechanism::new();
        assert!(approx(attention.update("a", 7.0, None), 1.0));
        assert!(approx(attention.update("b", -1.0, None), 0.0));
        assert!(approx(attention.update("c", f32::NAN, None), 0.0));
        assert!(approx(attention.history()[0].score, 1.0));
    }

    #[test]
    fn test_history_is_bounded() {
        let config = AttentionConfig {
            history_cap: 3,
            ..Default::default()
        };
        let attention = AttentionMechanism::with_config(config);
        for i in 0..5 {
            attention.update(&format!("e{i}"), 0.5, Some("ctx"));
        }

        let history = attention.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].entity_id, "e2");
        assert_eq!(history[2].context.as_deref(), Some("ctx"));
    }

    #[test]
    fn test_top_focus_filters_and_orders() {
        let attention = AttentionMechanism::new();
        attention.update("low", 0.3, None);
        attention.update("mid", 0.75, None);
        attention.update("high", 0.9, None);
        attention.update("edge", 0.7, None);

        let top = attention.top_focus(5);
        let names: Vec<&str> = top.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "edge"]);

        assert_eq!(attention.top_focus(1).len(), 1);
    }

    #[test]
    fn test_conversation_focus_is_normalized() {
        let attention = AttentionMechanism::new();
        let turns = [
            "What's the weather? Will it rain?",
            "Any news today?",
            "Thanks, and the weather tomorrow?",
            "ok",
        ];

        let focus = attention.analyze_conversation_focus(turns);
        assert!(approx(focus["weather"], 0.5));
        assert!(approx(focus["news"], 0.25));
        assert!(!focus.contains_key("technology"));

        let empty: Vec<String> = Vec::new();
        assert!(attention.analyze_conversation_focus(empty).is_empty());
    }

    #[test]
    fn test_stats_and_forget() {
        let attention = AttentionMechanism::new();
        attention.update("a", 0.8, None);
        attention.update("b", 0.4, None);

        let stats = attention.stats();
        assert_eq!(stats.tracked_entities, 2);
        assert_eq!(stats.currently_focused, 1);
        assert!(approx(stats.average_attention, 0.6));
        assert_eq!(stats.history_size, 2);

        assert!(attention.forget("a"));
        assert!(!attention.forget("a"));
        assert_eq!(attention.stats().tracked_entities, 1);
    }
}
