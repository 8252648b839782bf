/// Cache Subsystem: expiring key/value cache for intermediate results.
///
/// Collaborators park derived results here (parsed entities, sentiment
/// scores, API responses) keyed by request or session id, and read them
/// back in later pipeline steps.
///
/// ## Expiry
///
/// Every entry carries an absolute `expires_at`. Reads check it lazily and
/// drop the entry on the spot, so an expired value is never returned even if
/// no sweep has run yet. [`CacheSystem::cleanup_expired`] removes the rest
/// in bulk.
///
/// ## Eviction Policy
///
/// LFU (Least Frequently Used): when a new key arrives at a full cache,
/// the entry with the fewest reads is evicted. Among equally-read entries
/// the one accessed longest ago goes first. Overwriting an existing key
/// never evicts.
use crate::clock::{SharedClock, SystemClock};
use crate::config::duration_secs;
use crate::sweeper::Sweep;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_size: usize,

    /// TTL applied when `set` is called without one
    #[serde(rename = "default_ttl_secs", with = "duration_secs")]
    pub default_ttl: Duration,

    /// How often the background sweep removes expired entries
    #[serde(rename = "cleanup_interval_secs", with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,                       // Default: 1000 entries
            default_ttl: Duration::minutes(5),    // 5 minute TTL
            cleanup_interval: Duration::minutes(1),
        }
    }
}

/// Fixed-width identifier derived from a caller key.
///
/// The first 128 bits of the key's BLAKE3 hash. Collisions are accepted;
/// this is an index, not an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 16]);

impl CacheKey {
    /// Hash a caller key.
    pub fn from_key(key: &str) -> Self {
        let hash = blake3::hash(key.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash.as_bytes()[..16]);
        Self(id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    fn new(payload: JsonValue, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: now,
            last_accessed: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            access_count: 0,
        }
    }

    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Serialized size of the payload, or 0 if it cannot be encoded.
    fn approx_size(&self) -> usize {
        match bincode::serialized_size(&self.payload) {
            Ok(size) => size as usize,
            Err(err) => {
                warn!(%err, "Cache payload size estimate failed; counting as 0 bytes");
                0
            }
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Expiring LFU cache guarded by a single mutex.
#[derive(Debug)]
pub struct CacheSystem {
    config: CacheConfig,
    clock: SharedClock,
    state: Mutex<CacheState>,
}

impl CacheSystem {
    /// Create a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a cache reading time from `clock`.
    pub fn with_clock(mut config: CacheConfig, clock: SharedClock) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(config.max_size.min(4096)),
                ..CacheState::default()
            }),
            config,
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value. A missing or non-positive `ttl` falls back to the
    /// configured default.
    pub fn set(&self, key: &str, payload: JsonValue, ttl: Option<Duration>) {
        let id = CacheKey::from_key(key);
        let ttl = ttl
            .filter(|ttl| *ttl > Duration::zero())
            .unwrap_or(self.config.default_ttl);
        let now = self.clock.now();
        let mut state = self.state();

        if !state.entries.contains_key(&id) && state.entries.len() >= self.config.max_size {
            Self::evict_least_used(&mut state);
        }

        state.entries.insert(id, CacheEntry::new(payload, now, ttl));
        debug!(key, id = %id, ttl_secs = ttl.num_seconds(), "Cached value");
    }

    /// Read a value, dropping it if expired.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let id = CacheKey::from_key(key);
        let now = self.clock.now();
        let mut state = self.state();

        match state.entries.get(&id).map(|entry| entry.is_expired(now)) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(true) => {
                state.entries.remove(&id);
                state.misses += 1;
                debug!(key, "Cache entry expired on read");
                return None;
            }
            Some(false) => {}
        }

        state.hits += 1;
        let entry = state.entries.get_mut(&id)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        Some(entry.payload.clone())
    }

    /// True if a live entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.state()
            .entries
            .get(&CacheKey::from_key(key))
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove a key. Returns true if it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.state().entries.remove(&CacheKey::from_key(key)).is_some();
        if removed {
            debug!(key, "Cache entry deleted");
        }
        removed
    }

    /// Remove every entry. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        let count = state.entries.len();
        state.entries.clear();
        info!(count, "Cache cleared");
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();

        if removed > 0 {
            info!(removed, "Expired cache entries cleaned up");
        }
        removed
    }

    /// Number of resident entries, expired or not.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// True if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.max_size
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let state = self.state();

        CacheStats {
            item_count: state.entries.len(),
            expired_count: state.entries.values().filter(|e| e.is_expired(now)).count(),
            hit_count: state.hits,
            miss_count: state.misses,
            evictions: state.evictions,
            approx_size_bytes: state.entries.values().map(CacheEntry::approx_size).sum(),
            max_size: self.config.max_size,
        }
    }

    /// Evict the least-read entry, oldest access first on ties.
    fn evict_least_used(state: &mut CacheState) {
        let victim = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.access_count, entry.last_accessed))
            .map(|(id, _)| *id);

        if let Some(id) = victim {
            state.entries.remove(&id);
            state.evictions += 1;
            debug!(id = %id, "Evicted least used cache entry");
        }
    }
}

impl Default for CacheSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweep for CacheSystem {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn sweep(&self) -> usize {
        self.cleanup_expired()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub expired_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub evictions: u64,
    pub approx_size_bytes: usize,
    pub max_size: usize,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// Calculate utilization (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.item_count as f64 / self.max_size as f64
        }
    }
}
