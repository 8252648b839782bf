//! # koru-stm: Short-Term Memory & Attention
//!
//! An in-process, bounded short-term memory for conversational agents:
//! - **Current context** - labelled records that expire when left unread
//! - **Cache** - TTL key/value store with least-used eviction
//! - **Working memory** - small prioritized scratch space
//! - **Named buffers** - bounded FIFO queues
//! - **Attention** - salience scoring and per-entity focus tracking
//! - **Conversations** - rolling per-user histories and profiles
//!
//! ## Quick Start
//!
//! ```ignore
//! use koru_stm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stm = ShortTermMemory::new(MemoryConfig::default())?;
//!     stm.initialize();
//!
//!     // Remember what the user is trying to do
//!     stm.store_context("current_intent", json!("book_table"), 0.8, Metadata::new())?;
//!
//!     // Park derived results for other collaborators
//!     stm.cache_data("nlp:entities", json!(["Lisbon", "Friday"]), None)?;
//!
//!     // Track who or what the agent should focus on
//!     let score = stm.attention().score("URGENT: the app is not working", None);
//!     stm.set_attention_focus("user:42", score, Some("support request"))?;
//!
//!     println!("{:?}", stm.get_memory_stats()?);
//!     stm.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Bounds
//!
//! Every store is bounded. Capacity pressure is resolved by eviction, never
//! by an error, and every time-based expiry is enforced lazily on access as
//! well as by the periodic sweeps. Absence is reported as `None`, `false`
//! or an empty collection.
//!
//! ## Time
//!
//! All expiry reads the time through [`Clock`]. Pass a [`ManualClock`] to
//! [`ShortTermMemory::with_clock`] to step time forward in tests.

// Internal modules
mod core;
mod error;
mod lexicon;
mod types;

pub mod attention;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod memory;
pub mod sweeper;

// Public API exports
pub use crate::core::{MaintenanceReport, MemoryStats, ShortTermMemory};
pub use error::{StmError, StmResult};
pub use types::{MemoryRecord, Metadata};

pub use attention::{
    AttentionConfig, AttentionMechanism, AttentionRecord, AttentionScore, AttentionStats,
    AttentionUpdate, KeywordCategory, ScoreFactor,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::MemoryConfig;
pub use conversation::{
    ConversationConfig, ConversationManager, ConversationStats, ConversationSummary,
    ConversationTurn, Role, Sentiment,
};
pub use memory::{
    BufferConfig, BufferManager, BufferSlot, BufferStats, CacheConfig, CacheStats, CacheSystem,
    Priority, WorkingMemory, WorkingMemoryConfig, WorkingMemoryStats,
};
pub use sweeper::{Sweep, SweepTask};

// Re-export commonly used external types for convenience
pub use chrono::{DateTime, Duration, Utc};
pub use serde_json::{Value as JsonValue, json};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use koru_stm::prelude::*;
/// ```
pub mod prelude {
    pub use crate::attention::{AttentionMechanism, AttentionScore};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::MemoryConfig;
    pub use crate::conversation::{ConversationManager, Role};
    pub use crate::core::{MemoryStats, ShortTermMemory};
    pub use crate::error::{StmError, StmResult};
    pub use crate::memory::{BufferManager, CacheSystem, Priority, WorkingMemory};
    pub use crate::sweeper::Sweep;
    pub use crate::types::{MemoryRecord, Metadata};
    pub use chrono::{DateTime, Duration, Utc};
    pub use serde_json::{Value as JsonValue, json};
}
