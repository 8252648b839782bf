/// Working Memory: prioritized scratch space for in-flight computation.
///
/// Items are stored under caller keys with a priority from 1 (low) to 5
/// (high) and an optional TTL. Priority is the caller's judgement and is
/// never recalculated here.
///
/// ## Eviction Policy
///
/// When an insertion pushes the item count past capacity, items are ranked
/// by ascending priority and then by age, and the lowest ones go: always
/// enough to fit, and up to a tenth of capacity as long as the next
/// candidate's priority does not exceed the newcomer's. The newly inserted
/// item takes part in the ranking, so a low-priority newcomer into a memory
/// full of high-priority items is the one that goes, and nothing else does.
///
/// ## Expiry
///
/// TTL is checked lazily on every read and proactively by the periodic
/// sweep ([`WorkingMemory::cleanup_expired`]).
use crate::clock::{SharedClock, SystemClock};
use crate::config::duration_secs;
use crate::sweeper::Sweep;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Working memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Maximum number of items
    pub max_size: usize,

    /// How often the background sweep removes expired items
    #[serde(rename = "cleanup_interval_secs", with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            cleanup_interval: Duration::minutes(1),
        }
    }
}

/// Item priority, 1 (low) to 5 (high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(3);
    pub const HIGH: Priority = Priority(5);

    /// Build a priority, clamping into 1..=5.
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 5))
    }

    /// The numeric level.
    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::LOW
    }
}

impl From<u8> for Priority {
    fn from(level: u8) -> Self {
        Priority::new(level)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// An item held in working memory.
#[derive(Debug, Clone)]
pub struct WorkingItem {
    pub key: String,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
    pub ttl: Option<Duration>,
    pub priority: Priority,
    /// Insertion order, breaks ties between items stored at the same instant
    sequence: u64,
}

impl WorkingItem {
    /// True once the TTL (if any) has fully elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| {
            self.timestamp
                .checked_add_signed(ttl)
                .is_some_and(|deadline| now >= deadline)
        })
    }

    fn eviction_rank(&self) -> (Priority, DateTime<Utc>, u64) {
        (self.priority, self.timestamp, self.sequence)
    }
}

#[derive(Debug, Default)]
struct WorkingState {
    items: HashMap<String, WorkingItem>,
    next_sequence: u64,
    evictions: u64,
}

/// Prioritized, expiring key/value memory guarded by a single mutex.
#[derive(Debug)]
pub struct WorkingMemory {
    config: WorkingMemoryConfig,
    clock: SharedClock,
    state: Mutex<WorkingState>,
}

impl WorkingMemory {
    /// Create working memory with default configuration.
    pub fn new() -> Self {
        Self::with_config(WorkingMemoryConfig::default())
    }

    /// Create working memory with custom configuration.
    pub fn with_config(config: WorkingMemoryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create working memory reading time from `clock`.
    pub fn with_clock(mut config: WorkingMemoryConfig, clock: SharedClock) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            state: Mutex::new(WorkingState {
                items: HashMap::with_capacity(config.max_size.min(4096) + 1),
                ..WorkingState::default()
            }),
            config,
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, WorkingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an item, replacing any previous value under `key`.
    ///
    /// A `ttl` of zero or less means the item never expires, the same as `None`.
    pub fn store(
        &self,
        key: impl Into<String>,
        payload: JsonValue,
        ttl: Option<Duration>,
        priority: u8,
    ) {
        let key = key.into();
        let ttl = ttl.filter(|ttl| *ttl > Duration::zero());
        let priority = Priority::new(priority);
        let now = self.clock.now();
        let mut state = self.state();

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let replaced = state
            .items
            .insert(
                key.clone(),
                WorkingItem {
                    key: key.clone(),
                    payload,
                    timestamp: now,
                    ttl,
                    priority,
                    sequence,
                },
            )
            .is_some();

        debug!(key = %key, priority = priority.level(), replaced, "Stored working memory item");

        if state.items.len() > self.config.max_size {
            self.evict_low_priority(&mut state, priority);
        }
    }

    /// Read an item's payload, dropping it if expired.
    pub fn retrieve(&self, key: &str) -> Option<JsonValue> {
        let now = self.clock.now();
        let mut state = self.state();

        if Self::purge_if_expired(&mut state, key, now) {
            return None;
        }
        state.items.get(key).map(|item| item.payload.clone())
    }

    /// Remove an item. Returns true if it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.state().items.remove(key).is_some();
        if removed {
            debug!(key, "Working memory item deleted");
        }
        removed
    }

    /// True if a live item exists under `key`.
    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state();
        !Self::purge_if_expired(&mut state, key, now) && state.items.contains_key(key)
    }

    /// Payloads of every live item whose key contains `pattern`, oldest first.
    pub fn search_by_pattern(&self, pattern: &str) -> Vec<JsonValue> {
        let now = self.clock.now();
        let mut state = self.state();

        state.items.retain(|_, item| !item.is_expired(now));

        let mut matches: Vec<&WorkingItem> = state
            .items
            .values()
            .filter(|item| item.key.contains(pattern))
            .collect();
        matches.sort_by_key(|item| (item.timestamp, item.sequence));
        matches.into_iter().map(|item| item.payload.clone()).collect()
    }

    /// Remove every item.
    pub fn clear(&self) {
        let mut state = self.state();
        let count = state.items.len();
        state.items.clear();
        info!(count, "Working memory cleared");
    }

    /// Remove all expired items. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state();
        let before = state.items.len();
        state.items.retain(|_, item| !item.is_expired(now));
        let removed = before - state.items.len();

        if removed > 0 {
            debug!(removed, "Expired working memory items cleaned up");
        }
        removed
    }

    /// Number of resident items, expired or not.
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// True if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.max_size
    }

    /// Snapshot of working memory statistics.
    pub fn stats(&self) -> WorkingMemoryStats {
        let now = self.clock.now();
        let state = self.state();

        let mut priority_distribution: BTreeMap<u8, usize> = (1..=5).map(|p| (p, 0)).collect();
        let mut expired_items = 0;
        for item in state.items.values() {
            *priority_distribution.entry(item.priority.level()).or_insert(0) += 1;
            if item.is_expired(now) {
                expired_items += 1;
            }
        }

        WorkingMemoryStats {
            total_items: state.items.len(),
            expired_items,
            max_size: self.config.max_size,
            evictions: state.evictions,
            priority_distribution,
        }
    }

    /// Drop `key` if it has expired. Returns true if it was dropped.
    fn purge_if_expired(state: &mut WorkingState, key: &str, now: DateTime<Utc>) -> bool {
        let expired = state.items.get(key).is_some_and(|item| item.is_expired(now));
        if expired {
            state.items.remove(key);
            debug!(key, "Working memory item expired on read");
        }
        expired
    }

    /// Evict the lowest-ranked items after inserting one with `incoming` priority.
    ///
    /// The overflow is always evicted; the rest of the tenth-of-capacity
    /// batch only takes items ranked at or below `incoming`.
    fn evict_low_priority(&self, state: &mut WorkingState, incoming: Priority) {
        let overflow = state.items.len().saturating_sub(self.config.max_size);
        let batch = (self.config.max_size / 10).max(1).max(overflow);

        let mut ranked: Vec<(Priority, DateTime<Utc>, u64, String)> = state
            .items
            .values()
            .map(|item| {
                let (priority, timestamp, sequence) = item.eviction_rank();
                (priority, timestamp, sequence, item.key.clone())
            })
            .collect();
        ranked.sort();

        let victims = ranked
            .into_iter()
            .enumerate()
            .take_while(|(taken, (priority, ..))| *taken < overflow || *priority <= incoming)
            .take(batch);

        for (_, (priority, _, _, key)) in victims {
            state.items.remove(&key);
            state.evictions += 1;
            debug!(key = %key, priority = priority.level(), "Evicted working memory item");
        }
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweep for WorkingMemory {
    fn name(&self) -> &'static str {
        "working_memory"
    }

    fn sweep(&self) -> usize {
        self.cleanup_expired()
    }
}

/// Working memory statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingMemoryStats {
    pub total_items: usize,
    pub expired_items: usize,
    pub max_size: usize,
    pub evictions: u64,
    /// Item count per priority level 1..=5
    pub priority_distribution: BTreeMap<u8, usize>,
}

impl WorkingMemoryStats {
    /// Fill level as a percentage of capacity.
    pub fn usage_percent(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.total_items as f64 / self.max_size as f64 * 100.0
        }
    }
}
