/// The short-term memory facade.
///
/// [`ShortTermMemory`] is the single entry point collaborators talk to. It
/// owns one instance of each component and adds a small "current context"
/// map of labelled records plus a focus pointer on top of them.
///
/// # Lifecycle
///
/// A new facade is inert: every data operation returns
/// [`StmError::NotInitialized`] until [`ShortTermMemory::initialize`] runs.
/// Initializing starts the periodic sweeps (when enabled and a tokio
/// runtime is available); [`ShortTermMemory::shutdown`] stops them and
/// makes the facade inert again.
///
/// # Thread Safety
///
/// The facade is cheap to clone and every clone shares the same state.
/// It never holds one component's lock while calling into another.
use crate::attention::{AttentionMechanism, AttentionStats};
use crate::clock::{SharedClock, SystemClock};
use crate::config::MemoryConfig;
use crate::conversation::{ConversationManager, ConversationStats};
use crate::error::{StmError, StmResult};
use crate::memory::{
    BufferManager, BufferStats, CacheStats, CacheSystem, WorkingMemory, WorkingMemoryStats,
};
use crate::sweeper::{Sweep, SweepTask};
use crate::types::{MemoryRecord, Metadata};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Short-term memory: context records, cache, working memory, buffers,
/// attention and conversation state behind one handle.
///
/// # Example
///
/// ```ignore
/// use koru_stm::prelude::*;
///
/// let stm = ShortTermMemory::new(MemoryConfig::default())?;
/// stm.initialize();
///
/// stm.store_context("current_intent", json!("book_table"), 0.8, Metadata::new())?;
/// stm.set_attention_focus("user:42", 0.9, Some("asked twice"))?;
/// stm.cache_data("nlp:last_entities", vec!["Lisbon", "Friday"], None)?;
///
/// let intent = stm.retrieve_context("current_intent")?;
/// ```
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    config: Arc<MemoryConfig>,
    clock: SharedClock,
    context: Arc<DashMap<String, MemoryRecord>>,
    cache: Arc<CacheSystem>,
    working: Arc<WorkingMemory>,
    buffers: Arc<BufferManager>,
    attention: Arc<AttentionMechanism>,
    conversations: Arc<ConversationManager>,
    focus: Arc<Mutex<Option<String>>>,
    lifecycle: Arc<Lifecycle>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    initialized: AtomicBool,
    tasks: Mutex<Vec<SweepTask>>,
}

impl Lifecycle {
    fn tasks(&self) -> MutexGuard<'_, Vec<SweepTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ShortTermMemory {
    /// Build a facade on the system clock. Fails if the config is invalid.
    pub fn new(config: MemoryConfig) -> StmResult<Self> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Build a facade whose components all read time from `clock`.
    pub fn with_clock(config: MemoryConfig, clock: SharedClock) -> StmResult<Self> {
        config.validate()?;

        Ok(Self {
            cache: Arc::new(CacheSystem::with_clock(config.cache.clone(), clock.clone())),
            working: Arc::new(WorkingMemory::with_clock(config.working.clone(), clock.clone())),
            buffers: Arc::new(BufferManager::with_clock(config.buffers.clone(), clock.clone())),
            attention: Arc::new(AttentionMechanism::with_clock(
                config.attention.clone(),
                clock.clone(),
            )),
            conversations: Arc::new(ConversationManager::with_clock(
                config.conversation.clone(),
                clock.clone(),
            )),
            config: Arc::new(config),
            clock,
            context: Arc::new(DashMap::new()),
            focus: Arc::new(Mutex::new(None)),
            lifecycle: Arc::new(Lifecycle::default()),
        })
    }

    /// Start accepting operations and launch the background sweeps.
    ///
    /// Calling it again while initialized does nothing.
    pub fn initialize(&self) {
        // Flag and task list change together under the tasks lock
        let mut tasks = self.lifecycle.tasks();
        if self.lifecycle.initialized.swap(true, Ordering::SeqCst) {
            debug!("Short-term memory already initialized");
            return;
        }

        if self.config.background_sweeps {
            let targets: [(Arc<dyn Sweep>, Duration); 3] = [
                (self.working.clone() as Arc<dyn Sweep>, self.config.working.cleanup_interval),
                (self.buffers.clone() as Arc<dyn Sweep>, self.config.buffers.cleanup_interval),
                (self.cache.clone() as Arc<dyn Sweep>, self.config.cache.cleanup_interval),
            ];
            tasks.extend(
                targets
                    .into_iter()
                    .filter_map(|(target, every)| SweepTask::spawn(target, every)),
            );
        }
        let started = tasks.len();
        drop(tasks);

        info!(background_tasks = started, "Short-term memory initialized");
    }

    /// Stop the background sweeps and refuse further operations.
    ///
    /// Stored data is kept; a later `initialize()` resumes with it.
    pub fn shutdown(&self) {
        let stopped: Vec<SweepTask> = {
            let mut tasks = self.lifecycle.tasks();
            if !self.lifecycle.initialized.swap(false, Ordering::SeqCst) {
                return;
            }
            tasks.drain(..).collect()
        };

        for task in &stopped {
            task.stop();
        }
        info!(stopped = stopped.len(), "Short-term memory shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.initialized.load(Ordering::SeqCst)
    }

    /// Number of background sweep tasks currently running.
    pub fn background_tasks(&self) -> usize {
        self.lifecycle
            .tasks()
            .iter()
            .filter(|task| task.is_running())
            .count()
    }

    fn ensure_initialized(&self) -> StmResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StmError::NotInitialized)
        }
    }

    fn focus(&self) -> MutexGuard<'_, Option<String>> {
        self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop context records unread for longer than the retention window.
    fn purge_stale_context(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.context_retention;
        let before = self.context.len();
        self.context
            .retain(|_, record| !record.is_stale(now, retention));
        let removed = before.saturating_sub(self.context.len());
        if removed > 0 {
            debug!(removed, "Purged stale context records");
        }
        removed
    }

    // =========================================================================
    // Current context
    // =========================================================================

    /// Store a labelled record in the current context, replacing any previous
    /// record under the same label.
    pub fn store_context(
        &self,
        label: impl Into<String>,
        payload: JsonValue,
        importance: f32,
        context: Metadata,
    ) -> StmResult<()> {
        self.ensure_initialized()?;
        let label = label.into();
        let now = self.clock.now();

        self.purge_stale_context(now);

        let record = MemoryRecord::new(label.clone(), payload, importance, context, now);
        debug!(label = %label, importance = record.importance, "Stored context record");
        self.context.insert(label, record);
        Ok(())
    }

    /// Read a record and mark it as used.
    ///
    /// A record past the retention window is removed and reported absent.
    pub fn retrieve_context(&self, label: &str) -> StmResult<Option<MemoryRecord>> {
        self.ensure_initialized()?;
        let now = self.clock.now();
        let retention = self.config.context_retention;

        if let Some(mut record) = self.context.get_mut(label) {
            if !record.is_stale(now, retention) {
                record.last_accessed = now;
                return Ok(Some(record.clone()));
            }
        } else {
            return Ok(None);
        }

        self.context
            .remove_if(label, |_, record| record.is_stale(now, retention));
        debug!(label, "Context record expired");
        Ok(None)
    }

    /// Every live context record, keyed by label.
    ///
    /// This is a snapshot; it does not count as reading the records.
    pub fn get_current_context(&self) -> StmResult<BTreeMap<String, MemoryRecord>> {
        self.ensure_initialized()?;
        self.purge_stale_context(self.clock.now());

        Ok(self
            .context
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    // =========================================================================
    // Attention
    // =========================================================================

    /// Feed an attention signal for `entity_id` and make it the current focus.
    ///
    /// Returns the entity's stored score after decay and blending.
    pub fn set_attention_focus(
        &self,
        entity_id: &str,
        score: f32,
        context: Option<&str>,
    ) -> StmResult<f32> {
        self.ensure_initialized()?;
        let stored = self.attention.update(entity_id, score, context);
        *self.focus() = Some(entity_id.to_string());
        info!(entity = entity_id, score = stored, "Attention focus set");
        Ok(stored)
    }

    /// The entity most recently passed to `set_attention_focus`.
    pub fn current_focus(&self) -> StmResult<Option<String>> {
        self.ensure_initialized()?;
        Ok(self.focus().clone())
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Cache a serializable value under `key`.
    ///
    /// `ttl` defaults to the cache's configured TTL.
    pub fn cache_data<T: Serialize>(
        &self,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> StmResult<()> {
        self.ensure_initialized()?;
        let payload = serde_json::to_value(value)?;
        self.cache.set(key, payload, ttl);
        Ok(())
    }

    /// Read a cached value, `None` if absent or expired.
    pub fn get_cached_data(&self, key: &str) -> StmResult<Option<JsonValue>> {
        self.ensure_initialized()?;
        Ok(self.cache.get(key))
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Clear the current context, working memory and every named buffer.
    ///
    /// The cache, attention scores and current focus are kept.
    pub fn clear_memory(&self) -> StmResult<()> {
        self.ensure_initialized()?;
        let records = self.context.len();
        self.context.clear();
        self.working.clear();
        let buffers = self.buffers.delete_all();
        info!(records, buffers, "Short-term memory cleared");
        Ok(())
    }

    /// Run every sweep once, right now.
    pub fn run_maintenance(&self) -> StmResult<MaintenanceReport> {
        self.ensure_initialized()?;

        let report = MaintenanceReport {
            context_records: self.purge_stale_context(self.clock.now()),
            working_items: self.working.sweep(),
            buffers: self.buffers.sweep(),
            cache_entries: self.cache.sweep(),
            conversations: self.conversations.sweep(),
        };
        info!(removed = report.total(), "Maintenance pass complete");
        Ok(report)
    }

    /// Statistics from every component.
    pub fn get_memory_stats(&self) -> StmResult<MemoryStats> {
        self.ensure_initialized()?;

        Ok(MemoryStats {
            context_records: self.context.len(),
            current_focus: self.focus().clone(),
            background_tasks: self.background_tasks(),
            cache: self.cache.stats(),
            working: self.working.stats(),
            buffer_count: self.buffers.buffer_count(),
            buffers: self.buffers.stats_all(),
            attention: self.attention.stats(),
            conversations: self.conversations.stats(),
        })
    }

    // =========================================================================
    // Components
    // =========================================================================

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn cache(&self) -> &Arc<CacheSystem> {
        &self.cache
    }

    pub fn working_memory(&self) -> &Arc<WorkingMemory> {
        &self.working
    }

    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    pub fn attention(&self) -> &Arc<AttentionMechanism> {
        &self.attention
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }
}

/// Aggregated statistics for the whole facade.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub context_records: usize,
    pub current_focus: Option<String>,
    pub background_tasks: usize,
    pub cache: CacheStats,
    pub working: WorkingMemoryStats,
    pub buffer_count: usize,
    pub buffers: BTreeMap<String, BufferStats>,
    pub attention: AttentionStats,
    pub conversations: ConversationStats,
}

/// Entries removed by one [`ShortTermMemory::run_maintenance`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub context_records: usize,
    pub working_items: usize,
    pub buffers: usize,
    pub cache_entries: usize,
    pub conversations: usize,
}

impl MaintenanceReport {
    pub fn total(&self) -> usize {
        self.context_records
            + self.working_items
            + self.buffers
            + self.cache_entries
            + self.conversations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn create_test_memory() -> (ShortTermMemory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = MemoryConfig {
            background_sweeps: false,
            ..Default::default()
        };
        let stm = ShortTermMemory::with_clock(config, clock.clone()).unwrap();
        stm.initialize();
        (stm, clock)
    }

    #[test]
    fn test_operations_require_initialize() {
        let stm = ShortTermMemory::new(MemoryConfig::default()).unwrap();
        assert!(!stm.is_initialized());
        assert!(matches!(
            stm.store_context("a", json!(1), 0.5, Metadata::new()),
            Err(StmError::NotInitialized)
        ));
        assert!(matches!(stm.get_cached_data("a"), Err(StmError::NotInitialized)));
        assert!(matches!(stm.get_memory_stats(), Err(StmError::NotInitialized)));
        assert!(matches!(stm.clear_memory(), Err(StmError::NotInitialized)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MemoryConfig::default();
        config.working.max_size = 0;
        assert!(matches!(
            ShortTermMemory::new(config),
            Err(StmError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_initialize_outside_runtime_has_no_tasks() {
        let stm = ShortTermMemory::new(MemoryConfig::default()).unwrap();
        stm.initialize();
        assert!(stm.is_initialized());
        assert_eq!(stm.background_tasks(), 0);
    }

    #[test]
    fn test_shutdown_makes_facade_inert() {
        let (stm, _) = create_test_memory();
        stm.store_context("intent", json!("greet"), 0.5, Metadata::new())
            .unwrap();
        stm.shutdown();
        assert!(matches!(
            stm.retrieve_context("intent"),
            Err(StmError::NotInitialized)
        ));

        // data survives a restart
        stm.initialize();
        assert!(stm.retrieve_context("intent").unwrap().is_some());
    }

    #[test]
    fn test_store_and_retrieve_context() {
        let (stm, clock) = create_test_memory();
        let mut meta = Metadata::new();
        meta.insert("turn".into(), json!(3));
        stm.store_context("last_entities", json!(["Lisbon"]), 0.9, meta)
            .unwrap();

        clock.advance(Duration::seconds(10));
        let record = stm.retrieve_context("last_entities").unwrap().unwrap();
        assert_eq!(record.payload, json!(["Lisbon"]));
        assert_eq!(record.context["turn"], json!(3));
        assert_eq!(record.last_accessed - record.created_at, Duration::seconds(10));

        assert!(stm.retrieve_context("missing").unwrap().is_none());
    }

    #[test]
    fn test_retrieve_refreshes_retention() {
        let (stm, clock) = create_test_memory();
        stm.store_context("intent", json!("x"), 0.5, Metadata::new())
            .unwrap();

        clock.advance(Duration::minutes(50));
        assert!(stm.retrieve_context("intent").unwrap().is_some());
        clock.advance(Duration::minutes(50));
        assert!(stm.retrieve_context("intent").unwrap().is_some());

        clock.advance(Duration::minutes(61));
        assert!(stm.retrieve_context("intent").unwrap().is_none());
        assert_eq!(stm.get_memory_stats().unwrap().context_records, 0);
    }

    #[test]
    fn test_store_sweeps_stale_records() {
        let (stm, clock) = create_test_memory();
        stm.store_context("old", json!(1), 0.5, Metadata::new()).unwrap();
        clock.advance(Duration::hours(2));
        stm.store_context("new", json!(2), 0.5, Metadata::new()).unwrap();

        let current = stm.get_current_context().unwrap();
        assert_eq!(current.keys().collect::<Vec<_>>(), vec!["new"]);
    }

    #[test]
    fn test_attention_focus() {
        let (stm, _) = create_test_memory();
        assert_eq!(stm.current_focus().unwrap(), None);

        let stored = stm.set_attention_focus("user:7", 0.9, Some("greeting")).unwrap();
        assert!((stored - 0.9).abs() < 1e-6);
        assert_eq!(stm.current_focus().unwrap().as_deref(), Some("user:7"));
        assert!(stm.attention().is_focused("user:7"));
    }

    #[test]
    fn test_cache_data_typed() {
        let (stm, clock) = create_test_memory();
        stm.cache_data("entities", vec!["a", "b"], Some(Duration::seconds(1)))
            .unwrap();
        assert_eq!(stm.get_cached_data("entities").unwrap(), Some(json!(["a", "b"])));

        clock.advance(Duration::seconds(1));
        assert_eq!(stm.get_cached_data("entities").unwrap(), None);
    }

    #[test]
    fn test_clear_memory_keeps_cache_and_attention() {
        let (stm, _) = create_test_memory();
        stm.store_context("intent", json!("x"), 0.5, Metadata::new())
            .unwrap();
        stm.working_memory().store("wm", json!(1), None, 3);
        stm.buffers().create_buffer("audio", None);
        stm.cache_data("k", json!("v"), None).unwrap();
        stm.set_attention_focus("topic", 0.8, None).unwrap();

        stm.clear_memory().unwrap();

        assert!(stm.get_current_context().unwrap().is_empty());
        assert!(stm.working_memory().is_empty());
        assert_eq!(stm.buffers().buffer_count(), 0);
        assert_eq!(stm.get_cached_data("k").unwrap(), Some(json!("v")));
        assert!(stm.attention().is_focused("topic"));
        assert_eq!(stm.current_focus().unwrap().as_deref(), Some("topic"));
    }

    #[test]
    fn test_run_maintenance() {
        let (stm, clock) = create_test_memory();
        stm.store_context("c", json!(1), 0.5, Metadata::new()).unwrap();
        stm.working_memory()
            .store("w", json!(1), Some(Duration::seconds(5)), 1);
        stm.buffers().create_buffer("idle", None);
        stm.cache_data("k", json!(1), Some(Duration::seconds(5))).unwrap();
        stm.conversations()
            .add_message("u1", "hi", crate::conversation::Role::User, None);

        clock.advance(Duration::hours(2));
        let report = stm.run_maintenance().unwrap();
        assert_eq!(
            report,
            MaintenanceReport {
                context_records: 1,
                working_items: 1,
                buffers: 1,
                cache_entries: 1,
                conversations: 1,
            }
        );
        assert_eq!(report.total(), 5);
    }

    #[test]
    fn test_memory_stats_aggregate() {
        let (stm, _) = create_test_memory();
        stm.store_context("c", json!(1), 0.5, Metadata::new()).unwrap();
        stm.buffers().create_buffer("b", Some(3));
        stm.buffers().push("b", json!(1), "n");
        stm.cache_data("k", json!(1), None).unwrap();

        let stats = stm.get_memory_stats().unwrap();
        assert_eq!(stats.context_records, 1);
        assert_eq!(stats.buffer_count, 1);
        assert_eq!(stats.buffers["b"].item_count, 1);
        assert_eq!(stats.cache.item_count, 1);
        assert_eq!(stats.background_tasks, 0);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["working"]["max_size"], 100);
    }

    #[tokio::test]
    async fn test_initialize_spawns_sweeps_in_runtime() {
        let stm = ShortTermMemory::new(MemoryConfig::default()).unwrap();
        stm.initialize();
        stm.initialize();
        assert_eq!(stm.background_tasks(), 3);

        stm.shutdown();
        assert!(!stm.is_initialized());
        assert_eq!(stm.background_tasks(), 0);
    }
}
