/// Heuristic salience scoring for free text.
///
/// A score starts at a neutral base and collects bonuses:
/// - keyword categories (urgent, system, emotional, personal), each counted
///   once, with the keyword total capped
/// - message length, saturating at 500 characters
/// - emotional tone, a flat bonus if any tone marker is present
/// - caller metadata (`priority`, `source`)
///
/// The sum is clamped into `[0, 1]`. [`AttentionScore`] keeps the
/// individual factors so callers can see why a text scored as it did.
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::LazyLock;

use crate::lexicon::{KeywordSet, NEGATIVE_MARKERS, POSITIVE_MARKERS, TopicBucket, topics_in};
use crate::types::{Metadata, unit_interval};

/// Score every text starts from.
pub const BASE_SCORE: f32 = 0.5;

/// Upper bound on the combined keyword contribution.
pub const KEYWORD_CAP: f32 = 0.5;

/// Maximum length bonus.
pub const LENGTH_WEIGHT: f32 = 0.2;

/// Character count at which the length bonus saturates.
pub const LENGTH_SATURATION: usize = 500;

/// Bonus for text carrying any tone marker.
pub const EMOTION_BONUS: f32 = 0.1;

static URGENT: LazyLock<KeywordSet> = LazyLock::new(|| {
    KeywordSet::new(&["urgent", "important", "immediately", "critical", "emergency"])
});
static SYSTEM: LazyLock<KeywordSet> = LazyLock::new(|| {
    KeywordSet::new(&["error", "bug", "glitch", "not working", "system error"])
});
static EMOTIONAL: LazyLock<KeywordSet> =
    LazyLock::new(|| KeywordSet::new(&["help", "please", "thank", "sorry", "problem"]));
static PERSONAL: LazyLock<KeywordSet> = LazyLock::new(|| {
    KeywordSet::new(&["name", "profile", "settings", "personal", "private"])
});

/// Topic buckets used for conversation focus analysis.
static FOCUS_TOPICS: LazyLock<Vec<TopicBucket>> = LazyLock::new(|| {
    vec![
        TopicBucket::new("weather", &["weather", "rain", "sunny", "temperature"]),
        TopicBucket::new("news", &["news", "event", "incident"]),
        TopicBucket::new("technology", &["computer", "phone", "internet", "wifi"]),
        TopicBucket::new("help", &["help", "question", "explain", "how to"]),
        TopicBucket::new("settings", &["setting", "config", "parameter", "install"]),
    ]
});

/// A group of keywords that raises attention when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordCategory {
    Urgent,
    System,
    Emotional,
    Personal,
}

impl KeywordCategory {
    pub const ALL: [KeywordCategory; 4] = [
        KeywordCategory::Urgent,
        KeywordCategory::System,
        KeywordCategory::Emotional,
        KeywordCategory::Personal,
    ];

    /// Contribution when any keyword of the category is present.
    pub fn weight(self) -> f32 {
        match self {
            KeywordCategory::Urgent => 0.30,
            KeywordCategory::System => 0.25,
            KeywordCategory::Emotional => 0.20,
            KeywordCategory::Personal => 0.15,
        }
    }

    pub fn keywords(self) -> &'static KeywordSet {
        match self {
            KeywordCategory::Urgent => &URGENT,
            KeywordCategory::System => &SYSTEM,
            KeywordCategory::Emotional => &EMOTIONAL,
            KeywordCategory::Personal => &PERSONAL,
        }
    }
}

impl fmt::Display for KeywordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeywordCategory::Urgent => "urgent",
            KeywordCategory::System => "system",
            KeywordCategory::Emotional => "emotional",
            KeywordCategory::Personal => "personal",
        };
        write!(f, "{name}")
    }
}

/// One component of an attention score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "factor", content = "value", rename_all = "snake_case")]
pub enum ScoreFactor {
    /// Neutral starting point
    Base(f32),
    /// Capped keyword category total
    Keywords(f32),
    /// Length bonus
    Length(f32),
    /// Tone marker bonus
    Emotion(f32),
    /// Priority and source bonus
    Metadata(f32),
}

impl ScoreFactor {
    pub fn value(&self) -> f32 {
        match *self {
            ScoreFactor::Base(v)
            | ScoreFactor::Keywords(v)
            | ScoreFactor::Length(v)
            | ScoreFactor::Emotion(v)
            | ScoreFactor::Metadata(v) => v,
        }
    }
}

/// An attention score with its breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionScore {
    /// Final score, clamped (0.0 - 1.0)
    pub score: f32,

    /// Individual contributions, before clamping
    pub factors: Vec<ScoreFactor>,

    /// Keyword categories found in the text
    pub categories: Vec<KeywordCategory>,
}

impl AttentionScore {
    /// Sum of the factors before clamping.
    pub fn raw_total(&self) -> f32 {
        self.factors.iter().map(ScoreFactor::value).sum()
    }
}

/// Score `text`, optionally taking caller metadata into account.
pub fn score_text(text: &str, metadata: Option<&Metadata>) -> AttentionScore {
    let categories: Vec<KeywordCategory> = KeywordCategory::ALL
        .into_iter()
        .filter(|category| category.keywords().matches(text))
        .collect();
    let keywords = categories
        .iter()
        .map(|category| category.weight())
        .sum::<f32>()
        .min(KEYWORD_CAP);

    let chars = text.chars().count();
    let length = (chars as f32 / LENGTH_SATURATION as f32).min(1.0) * LENGTH_WEIGHT;

    let emotion = if POSITIVE_MARKERS.matches(text) || NEGATIVE_MARKERS.matches(text) {
        EMOTION_BONUS
    } else {
        0.0
    };

    let metadata = metadata.map(metadata_bonus).unwrap_or(0.0);

    let factors = vec![
        ScoreFactor::Base(BASE_SCORE),
        ScoreFactor::Keywords(keywords),
        ScoreFactor::Length(length),
        ScoreFactor::Emotion(emotion),
        ScoreFactor::Metadata(metadata),
    ];
    let total: f32 = factors.iter().map(ScoreFactor::value).sum();

    AttentionScore {
        score: unit_interval(total),
        factors,
        categories,
    }
}

/// Bonus from `priority` ("high" / "critical") and `source`
/// ("user_input" / "system_alert") metadata.
pub fn metadata_bonus(metadata: &Metadata) -> f32 {
    let priority = match metadata.get("priority").and_then(JsonValue::as_str) {
        Some("high") => 0.2,
        Some("critical") => 0.4,
        _ => 0.0,
    };
    let source = match metadata.get("source").and_then(JsonValue::as_str) {
        Some("user_input" | "system_alert") => 0.1,
        _ => 0.0,
    };
    priority + source
}

/// Focus topics mentioned in `text`.
pub fn focus_topics(text: &str) -> Vec<&'static str> {
    topics_in(&FOCUS_TOPICS, text)
}
