//! Keyword sets for lightweight text signals.
//!
//! Attention scoring, topic bucketing and conversation sentiment all work
//! by case-insensitive substring matching against small word lists. Each
//! list compiles once into a [`RegexSet`] so a single pass over the text
//! reports every keyword present.

use regex::{RegexSet, RegexSetBuilder};
use std::sync::LazyLock;
use tracing::warn;

/// A compiled, case-insensitive list of keywords.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    words: Vec<String>,
    set: RegexSet,
}

impl KeywordSet {
    /// Compile a keyword list. Keywords are matched literally, as substrings.
    pub fn new(words: &[&str]) -> Self {
        let patterns: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|err| {
                warn!(%err, "Keyword set failed to compile; matching disabled");
                RegexSet::empty()
            });

        Self {
            words: words.iter().map(|w| w.to_string()).collect(),
            set,
        }
    }

    /// True if any keyword occurs in `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Number of distinct keywords that occur in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.set.matches(text).iter().count()
    }

    /// The keywords that occur in `text`, in list order.
    pub fn found<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.set
            .matches(text)
            .into_iter()
            .map(|i| self.words[i].as_str())
            .collect()
    }

    /// The source keywords.
    pub fn words(&self) -> &[String] {
        &self.words
    }
}

/// A named bucket of keywords; text "is about" the topic if any keyword matches.
#[derive(Debug, Clone)]
pub struct TopicBucket {
    pub topic: &'static str,
    pub keywords: KeywordSet,
}

impl TopicBucket {
    pub fn new(topic: &'static str, words: &[&str]) -> Self {
        Self {
            topic,
            keywords: KeywordSet::new(words),
        }
    }
}

/// Topics present in `text`, in bucket order.
pub fn topics_in<'a>(buckets: &'a [TopicBucket], text: &str) -> Vec<&'a str> {
    buckets
        .iter()
        .filter(|b| b.keywords.matches(text))
        .map(|b| b.topic)
        .collect()
}

/// Words that mark a message as positive in tone.
pub static POSITIVE_MARKERS: LazyLock<KeywordSet> = LazyLock::new(|| {
    KeywordSet::new(&["thank", "good", "great", "excellent", "wonderful", "glad", "success"])
});

/// Words that mark a message as negative in tone.
pub static NEGATIVE_MARKERS: LazyLock<KeywordSet> = LazyLock::new(|| {
    KeywordSet::new(&["bad", "terrible", "wrong", "error", "problem", "angry"])
});
