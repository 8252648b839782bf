/// Storage components of the short-term memory.
///
/// Three independent stores, each with its own lock, bound and sweep:
///
/// - **Cache**: keyed by hashed string keys, TTL per entry, least-used
///   eviction when full
/// - **Working memory**: small prioritized store, evicts the lowest
///   priority tenth when it overflows
/// - **Named buffers**: bounded FIFO queues, oldest entry dropped on
///   overflow, idle empty buffers reaped
///
/// ```text
/// set/get  → Cache          (hit/miss counters, lazy expiry)
/// store    → WorkingMemory  (priority 1..=5, optional TTL)
/// push/pop → BufferManager  (per-name FIFO)
/// ```
pub mod buffer;
pub mod cache;
pub mod working;

pub use buffer::{BufferConfig, BufferManager, BufferSlot, BufferStats};
pub use cache::{CacheConfig, CacheEntry, CacheKey, CacheStats, CacheSystem};
pub use working::{Priority, WorkingItem, WorkingMemory, WorkingMemoryConfig, WorkingMemoryStats};
