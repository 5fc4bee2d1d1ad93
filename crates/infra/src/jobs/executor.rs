//! Task executors used by the launcher to dispatch job runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::{debug, warn};

/// A unit of work handed to a [`TaskExecutor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The executor refused a task; the task was not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task rejected: {0}")]
pub struct TaskRejected(pub String);

/// Dispatch strategy for job runs.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task) -> Result<(), TaskRejected>;
}

/// Runs each task inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncTaskExecutor;

impl TaskExecutor for SyncTaskExecutor {
    fn execute(&self, task: Task) -> Result<(), TaskRejected> {
        task();
        Ok(())
    }
}

/// Runs each task on its own named OS thread, with at most `max_concurrent`
/// tasks in flight. Tasks beyond the bound are rejected, not queued.
#[derive(Debug, Clone)]
pub struct ThreadTaskExecutor {
    name: String,
    max_concurrent: usize,
    active: Arc<AtomicUsize>,
}

impl Default for ThreadTaskExecutor {
    fn default() -> Self {
        Self {
            name: "forgebatch-worker".to_string(),
            max_concurrent: 4,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ThreadTaskExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self::default().with_max_concurrent(max_concurrent)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_concurrent).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotGuard(self.active.clone()))
    }
}

/// Releases a concurrency slot when the task finishes, even on panic.
struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskExecutor for ThreadTaskExecutor {
    fn execute(&self, task: Task) -> Result<(), TaskRejected> {
        let Some(slot) = self.try_acquire() else {
            warn!(
                executor = %self.name,
                max_concurrent = self.max_concurrent,
                "pool exhausted, rejecting task"
            );
            return Err(TaskRejected(format!(
                "pool exhausted: {} of {} workers busy",
                self.max_concurrent, self.max_concurrent
            )));
        };

        let name = self.name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _slot = slot;
                debug!(executor = %name, "task started");
                task();
            })
            .map(|_| ())
            .map_err(|e| TaskRejected(format!("failed to spawn worker thread: {e}")))
    }
}
