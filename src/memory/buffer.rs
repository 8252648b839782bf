/// Named Buffers: independent bounded FIFO queues.
///
/// A buffer is created with a fixed capacity. Pushing past capacity drops
/// the oldest slot; this is queue behaviour, not an error. Any access
/// (push, pop, peek, read, search, clear) marks the buffer as used.
///
/// ## Reaping
///
/// Buffers that are empty and have not been used within the idle window are
/// deleted by [`BufferManager::reap_idle`], which the facade runs on a
/// timer. This bounds memory even when callers forget to delete buffers.
use crate::clock::{SharedClock, SystemClock};
use crate::config::duration_secs;
use crate::sweeper::Sweep;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffer manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity used when `create_buffer` is called without one
    pub default_capacity: usize,

    /// Empty buffers unused for longer than this are reaped
    #[serde(rename = "idle_timeout_secs", with = "duration_secs")]
    pub idle_timeout: Duration,

    /// How often the background reaper runs
    #[serde(rename = "cleanup_interval_secs", with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            default_capacity: 100,
            idle_timeout: Duration::hours(1),
            cleanup_interval: Duration::seconds(30),
        }
    }
}

/// One entry in a named buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferSlot {
    pub id: Uuid,
    pub data: JsonValue,
    pub type_tag: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct NamedBuffer {
    slots: VecDeque<BufferSlot>,
    capacity: usize,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    /// Slots dropped because the buffer was full
    dropped: u64,
}

impl NamedBuffer {
    fn new(capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            created_at: now,
            last_accessed: now,
            dropped: 0,
        }
    }

    fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.slots.is_empty() && now.signed_duration_since(self.last_accessed) > idle_timeout
    }

    fn stats(&self, name: &str) -> BufferStats {
        let mut type_distribution = BTreeMap::new();
        for slot in &self.slots {
            *type_distribution.entry(slot.type_tag.clone()).or_insert(0) += 1;
        }

        BufferStats {
            name: name.to_string(),
            item_count: self.slots.len(),
            capacity: self.capacity,
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            dropped: self.dropped,
            type_distribution,
        }
    }
}

/// Registry of named FIFO buffers guarded by a single mutex.
#[derive(Debug)]
pub struct BufferManager {
    config: BufferConfig,
    clock: SharedClock,
    buffers: Mutex<HashMap<String, NamedBuffer>>,
}

impl BufferManager {
    /// Create a manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    /// Create a manager with custom configuration.
    pub fn with_config(config: BufferConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a manager reading time from `clock`.
    pub fn with_clock(config: BufferConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<String, NamedBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on a named buffer, marking it used. `None` if it doesn't exist.
    fn with_buffer<T>(&self, name: &str, f: impl FnOnce(&mut NamedBuffer) -> T) -> Option<T> {
        let now = self.clock.now();
        let mut buffers = self.buffers();
        let buffer = buffers.get_mut(name)?;
        buffer.last_accessed = now;
        Some(f(buffer))
    }

    /// Create a buffer. Returns false if the name is taken.
    ///
    /// A capacity of 0 is raised to 1.
    pub fn create_buffer(&self, name: impl Into<String>, capacity: Option<usize>) -> bool {
        let name = name.into();
        let capacity = capacity.unwrap_or(self.config.default_capacity).max(1);
        let now = self.clock.now();
        let mut buffers = self.buffers();

        if buffers.contains_key(&name) {
            return false;
        }

        debug!(buffer = %name, capacity, "Created buffer");
        buffers.insert(name, NamedBuffer::new(capacity, now));
        true
    }

    /// Append to a buffer, dropping the oldest slot if full.
    ///
    /// Returns false if the buffer does not exist.
    pub fn push(&self, name: &str, data: JsonValue, type_tag: impl Into<String>) -> bool {
        let now = self.clock.now();
        let slot = BufferSlot {
            id: Uuid::new_v4(),
            data,
            type_tag: type_tag.into(),
            timestamp: now,
        };

        let pushed = self.with_buffer(name, |buffer| {
            if buffer.slots.len() >= buffer.capacity {
                buffer.slots.pop_front();
                buffer.dropped += 1;
            }
            buffer.slots.push_back(slot);
        });

        if pushed.is_none() {
            warn!(buffer = name, "Push to unknown buffer");
        }
        pushed.is_some()
    }

    /// Remove and return the oldest entry.
    pub fn pop(&self, name: &str) -> Option<JsonValue> {
        self.with_buffer(name, |buffer| buffer.slots.pop_front())
            .flatten()
            .map(|slot| slot.data)
    }

    /// Look at the entry at `index` (0 = oldest) without removing it.
    pub fn peek(&self, name: &str, index: usize) -> Option<JsonValue> {
        self.with_buffer(name, |buffer| buffer.slots.get(index).map(|slot| slot.data.clone()))
            .flatten()
    }

    /// All entries, oldest first. Empty if the buffer does not exist.
    pub fn all(&self, name: &str) -> Vec<JsonValue> {
        self.with_buffer(name, |buffer| {
            buffer.slots.iter().map(|slot| slot.data.clone()).collect()
        })
        .unwrap_or_default()
    }

    /// All slots with their metadata, oldest first.
    pub fn slots(&self, name: &str) -> Vec<BufferSlot> {
        self.with_buffer(name, |buffer| buffer.slots.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries for which `predicate` holds, oldest first.
    ///
    /// The predicate runs under the manager's lock and must not call back
    /// into the manager.
    pub fn search(&self, name: &str, predicate: impl Fn(&JsonValue) -> bool) -> Vec<JsonValue> {
        self.with_buffer(name, |buffer| {
            buffer
                .slots
                .iter()
                .filter(|slot| predicate(&slot.data))
                .map(|slot| slot.data.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Empty a buffer but keep it. Returns false if it does not exist.
    pub fn clear(&self, name: &str) -> bool {
        let cleared = self.with_buffer(name, |buffer| buffer.slots.clear()).is_some();
        if cleared {
            info!(buffer = name, "Buffer cleared");
        }
        cleared
    }

    /// Delete a buffer. Returns false if it does not exist.
    pub fn delete(&self, name: &str) -> bool {
        let deleted = self.buffers().remove(name).is_some();
        if deleted {
            info!(buffer = name, "Buffer deleted");
        }
        deleted
    }

    /// Delete every buffer. Returns how many were deleted.
    pub fn delete_all(&self) -> usize {
        let mut buffers = self.buffers();
        let count = buffers.len();
        buffers.clear();
        info!(count, "All buffers deleted");
        count
    }

    /// Number of entries in a buffer, `None` if it does not exist.
    ///
    /// Does not count as an access.
    pub fn len(&self, name: &str) -> Option<usize> {
        self.buffers().get(name).map(|buffer| buffer.slots.len())
    }

    /// Names of all buffers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buffers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers().len()
    }

    /// Statistics for one buffer. Does not count as an access.
    pub fn stats(&self, name: &str) -> Option<BufferStats> {
        self.buffers().get(name).map(|buffer| buffer.stats(name))
    }

    /// Statistics for every buffer, keyed by name.
    pub fn stats_all(&self) -> BTreeMap<String, BufferStats> {
        self.buffers()
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.stats(name)))
            .collect()
    }

    /// Delete empty buffers idle past the configured window.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_timeout = self.config.idle_timeout;
        let mut buffers = self.buffers();
        let before = buffers.len();
        buffers.retain(|_, buffer| !buffer.is_idle(now, idle_timeout));
        let removed = before - buffers.len();

        if removed > 0 {
            info!(removed, "Reaped idle buffers");
        }
        removed
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweep for BufferManager {
    fn name(&self) -> &'static str {
        "buffers"
    }

    fn sweep(&self) -> usize {
        self.reap_idle()
    }
}

/// Statistics for one named buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub name: String,
    pub item_count: usize,
    pub capacity: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub dropped: u64,
    /// Entry count per type tag
    pub type_distribution: BTreeMap<String, usize>,
}

impl BufferStats {
    /// Fill level as a percentage of capacity.
    pub fn usage_percent(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.item_count as f64 / self.capacity as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn create_test_manager() -> (BufferManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            BufferManager::with_clock(BufferConfig::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_create_is_unique() {
        let (manager, _) = create_test_manager();
        assert!(manager.create_buffer("audio", Some(4)));
        assert!(!manager.create_buffer("audio", Some(8)));
        assert_eq!(manager.stats("audio").unwrap().capacity, 4);
    }

    #[test]
    fn test_fifo_overflow_drops_oldest() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("b", Some(2));
        assert!(manager.push("b", json!(1), "n"));
        assert!(manager.push("b", json!(2), "n"));
        assert!(manager.push("b", json!(3), "n"));

        assert_eq!(manager.all("b"), vec![json!(2), json!(3)]);
        assert_eq!(manager.stats("b").unwrap().dropped, 1);
    }

    #[test]
    fn test_pop_and_peek() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("q", None);
        manager.push("q", json!("first"), "text");
        manager.push("q", json!("second"), "text");

        assert_eq!(manager.peek("q", 0), Some(json!("first")));
        assert_eq!(manager.peek("q", 1), Some(json!("second")));
        assert_eq!(manager.peek("q", 2), None);

        assert_eq!(manager.pop("q"), Some(json!("first")));
        assert_eq!(manager.pop("q"), Some(json!("second")));
        assert_eq!(manager.pop("q"), None);
    }

    #[test]
    fn test_unknown_buffer_is_absent_not_error() {
        let (manager, _) = create_test_manager();
        assert!(!manager.push("nope", json!(1), "n"));
        assert_eq!(manager.pop("nope"), None);
        assert_eq!(manager.peek("nope", 0), None);
        assert!(manager.all("nope").is_empty());
        assert!(!manager.clear("nope"));
        assert!(!manager.delete("nope"));
        assert!(manager.stats("nope").is_none());
        assert_eq!(manager.len("nope"), None);
    }

    #[test]
    fn test_search() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("events", None);
        for i in 0..6 {
            manager.push("events", json!({"n": i}), "event");
        }

        let even = manager.search("events", |v| v["n"].as_i64().is_some_and(|n| n % 2 == 0));
        assert_eq!(even, vec![json!({"n": 0}), json!({"n": 2}), json!({"n": 4})]);
    }

    #[test]
    fn test_clear_keeps_buffer() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("b", None);
        manager.push("b", json!(1), "n");

        assert!(manager.clear("b"));
        assert_eq!(manager.len("b"), Some(0));
        assert!(manager.delete("b"));
        assert_eq!(manager.buffer_count(), 0);
    }

    #[test]
    fn test_reap_only_empty_and_idle() {
        let (manager, clock) = create_test_manager();
        manager.create_buffer("empty_idle", None);
        manager.create_buffer("full_idle", None);
        manager.create_buffer("empty_recent", None);
        manager.push("full_idle", json!(1), "n");

        clock.advance(Duration::minutes(30));
        manager.all("empty_recent");

        clock.advance(Duration::minutes(31));
        assert_eq!(manager.reap_idle(), 1);
        assert_eq!(manager.names(), vec!["empty_recent", "full_idle"]);

        clock.advance(Duration::minutes(30));
        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.names(), vec!["full_idle"]);
    }

    #[test]
    fn test_stats() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("mixed", Some(4));
        manager.push("mixed", json!("hi"), "text");
        manager.push("mixed", json!([0.1, 0.2]), "embedding");
        manager.push("mixed", json!("yo"), "text");

        let stats = manager.stats("mixed").unwrap();
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.type_distribution["text"], 2);
        assert_eq!(stats.type_distribution["embedding"], 1);
        assert!((stats.usage_percent() - 75.0).abs() < 1e-9);

        manager.create_buffer("other", None);
        let all = manager.stats_all();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("other"));
    }

    #[test]
    fn test_slot_metadata() {
        let (manager, _) = create_test_manager();
        manager.create_buffer("b", None);
        manager.push("b", json!(1), "a");
        manager.push("b", json!(2), "b");

        let slots = manager.slots("b");
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].type_tag, "a");
        assert_ne!(slots[0].id, slots[1].id);
    }
}
