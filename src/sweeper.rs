//! Periodic background reclamation.
//!
//! Components that expire or reap data implement [`Sweep`]. A sweep is a
//! plain synchronous method, so tests call it directly; [`SweepTask`] runs
//! the same method on a fixed tokio interval until stopped.
//!
//! A sweep takes the component's own lock, exactly like a foreground call,
//! so sweeps and requests serialize without any cross-component locking.

use chrono::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

/// A batch pass that removes every currently expired or idle entry.
pub trait Sweep: Send + Sync + 'static {
    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Run one pass. Returns the number of entries removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running periodic sweep.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct SweepTask {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    /// Spawn `target.sweep()` every `every` on the current tokio runtime.
    ///
    /// Returns `None` when called outside a runtime; the caller keeps working
    /// on lazy expiry alone.
    pub fn spawn(target: Arc<dyn Sweep>, every: Duration) -> Option<Self> {
        let name = target.name();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(task = name, "No tokio runtime; background sweep not started");
                return None;
            }
        };

        let period = tokio::time::Duration::from_millis(every.num_milliseconds().max(1) as u64);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; sweeping starts one period in.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let removed = target.sweep();
                trace!(task = name, removed, "Sweep tick");
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Background sweep started");

        Some(Self {
            name,
            shutdown,
            handle,
        })
    }

    /// Name of the component being swept.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True until the task has been stopped and has exited.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown.swap(true, Ordering::Relaxed) {
            debug!(task = self.name, "Background sweep stopped");
        }
        self.handle.abort();
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    impl Sweep for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn sweep(&self) -> usize {
            self.runs.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[test]
    fn test_spawn_outside_runtime_returns_none() {
        let counter = Arc::new(Counter::default());
        assert!(SweepTask::spawn(counter, Duration::seconds(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval_until_stopped() {
        let counter = Arc::new(Counter::default());
        let task = SweepTask::spawn(counter.clone(), Duration::seconds(1)).unwrap();
        assert_eq!(task.name(), "counter");

        // Nothing happens before the first full period.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_millis(3_000)).await;
        let runs = counter.runs.load(Ordering::SeqCst);
        assert!(runs >= 3, "expected at least 3 sweeps, got {runs}");

        task.stop();
        tokio::time::sleep(std::time::Duration::from_millis(5_000)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), runs);
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let counter = Arc::new(Counter::default());
        let task = SweepTask::spawn(counter.clone(), Duration::seconds(1)).unwrap();
        drop(task);

        tokio::time::sleep(std::time::Duration::from_millis(5_000)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);
    }
}
