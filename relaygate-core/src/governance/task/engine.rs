//! In-memory Task Engine: fire-and-forget work with poll-based retrieval.
//!
//! # Concurrency
//!
//! Tasks live in a `DashMap`; an entry is inserted before `start` returns and
//! is only mutated once more, under its shard lock, when the work finishes.
//! Each entry carries a `Notify` so status checks can long-poll instead of
//! sleeping for the whole cooldown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::TaskError;
use super::types::{PollOutcome, TaskId, TaskResult, TaskStatus, WorkFailure};

// ============================================================================
// Configuration
// ============================================================================

/// Shortest period of the background reaper; a zero interval is raised to this.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Task Engine timing.
#[derive(Debug, Clone)]
pub struct TaskEngineConfig {
    /// Longest a status check on a pending task waits before answering.
    pub poll_cooldown: Duration,
    /// How long a completed task's result stays retrievable.
    pub result_retention: Duration,
    /// Interval of the background reaper.
    pub cleanup_interval: Duration,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            poll_cooldown: Duration::from_secs(3),
            result_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

struct TaskEntry<T> {
    status: TaskStatus,
    result: Option<TaskResult<T>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Monotonic completion time, used for retention.
    completed: Option<Instant>,
    notify: Arc<Notify>,
}

impl<T: Clone> TaskEntry<T> {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
            completed: None,
            notify: Arc::new(Notify::new()),
        }
    }

    fn outcome(&self) -> PollOutcome<T> {
        match (&self.status, &self.result) {
            (TaskStatus::Done, Some(result)) => PollOutcome::Done(result.clone()),
            _ => PollOutcome::Pending,
        }
    }
}

/// Point-in-time view of a task, for listings and diagnostics.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct Inner<T> {
    tasks: DashMap<TaskId, TaskEntry<T>>,
    next_id: AtomicU64,
    config: TaskEngineConfig,
}

impl<T: Clone> Inner<T> {
    fn complete(&self, task_id: &TaskId, result: TaskResult<T>) {
        let notify = {
            let Some(mut entry) = self.tasks.get_mut(task_id) else {
                tracing::warn!(task_id = %task_id, "completed task missing from engine");
                return;
            };
            if entry.status.is_terminal() {
                tracing::warn!(task_id = %task_id, "task completed twice, keeping first result");
                return;
            }
            entry.status = TaskStatus::Done;
            entry.result = Some(result);
            entry.completed_at = Some(Utc::now());
            entry.completed = Some(Instant::now());
            entry.notify.clone()
        };
        notify.notify_waiters();
        tracing::debug!(task_id = %task_id, "task done");
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs units of work in the background and stores their results by id.
///
/// Cloning is cheap and clones share the same task map, so one engine can be
/// handed to the approval queue and the request handlers alike.
pub struct TaskEngine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for TaskEngine<T> {
    fn default() -> Self {
        Self::new(TaskEngineConfig::default())
    }
}

impl<T: Clone + Send + Sync + 'static> TaskEngine<T> {
    #[must_use]
    pub fn new(config: TaskEngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                next_id: AtomicU64::new(0),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TaskEngineConfig {
        &self.inner.config
    }

    /// Launches `work` on its own tokio task and returns its id immediately.
    ///
    /// The task is visible to [`check_status`](Self::check_status) before this
    /// returns. Starting never fails; a panic inside `work` is stored as a
    /// [`WorkFailure`] result.
    pub fn start<F>(&self, work: F) -> TaskId
    where
        F: Future<Output = T> + Send + 'static,
    {
        let seq = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task_id = TaskId::from_sequence(seq);
        self.inner.tasks.insert(task_id.clone(), TaskEntry::pending());

        let handle = tokio::spawn(work);
        let inner = Arc::clone(&self.inner);
        let id = task_id.clone();
        tokio::spawn(async move {
            let result = handle.await.map_err(|e| {
                let failure = WorkFailure::from_join(&e);
                tracing::error!(task_id = %id, error = %failure, "task work failed");
                failure
            });
            inner.complete(&id, result);
        });

        tracing::debug!(task_id = %task_id, "task started");
        task_id
    }

    /// Returns the task's state, long-polling up to the configured cooldown
    /// while it is pending.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for ids never issued or already reaped.
    pub async fn check_status(&self, task_id: &TaskId) -> Result<PollOutcome<T>, TaskError> {
        self.wait_for(task_id, self.inner.config.poll_cooldown).await
    }

    /// Waits up to `timeout` for the task to finish.
    ///
    /// Returns as soon as the task is done; returns `Pending` if it is still
    /// running when the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub async fn wait_for(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<PollOutcome<T>, TaskError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = self.entry_notify(task_id)?;

            // Register before checking so a completion in between is not missed.
            let notified = notify.notified();

            let outcome = self.peek(task_id)?;
            if outcome.status().is_terminal() {
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(PollOutcome::Pending);
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.peek(task_id);
            }
        }
    }

    /// Returns the task's state without waiting.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub fn peek(&self, task_id: &TaskId) -> Result<PollOutcome<T>, TaskError> {
        self.inner
            .tasks
            .get(task_id)
            .map(|entry| entry.outcome())
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.clone(),
            })
    }

    /// Lists all known tasks, oldest id first.
    #[must_use]
    pub fn list(&self) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = self
            .inner
            .tasks
            .iter()
            .map(|entry| TaskSummary {
                id: entry.key().clone(),
                status: entry.status,
                created_at: entry.created_at,
                completed_at: entry.completed_at,
            })
            .collect();
        tasks.sort_by_key(|t| t.id.as_str().parse::<u64>().unwrap_or(u64::MAX));
        tasks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }

    /// Removes completed tasks older than the retention window.
    ///
    /// Pending tasks are never reaped. Returns the number removed.
    pub fn reap_completed(&self) -> usize {
        let retention = self.inner.config.result_retention;
        let now = Instant::now();
        let before = self.inner.tasks.len();
        self.inner.tasks.retain(|_, entry| match entry.completed {
            Some(done) => now.saturating_duration_since(done) < retention,
            None => true,
        });
        let reaped = before.saturating_sub(self.inner.tasks.len());
        if reaped > 0 {
            tracing::debug!(reaped, "reaped completed tasks");
        }
        reaped
    }

    /// Spawns the periodic reaper. It stops when `cancel` fires.
    pub fn spawn_reaper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        let period = self.inner.config.cleanup_interval.max(MIN_TICK);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        engine.reap_completed();
                    }
                }
            }
            tracing::debug!("task reaper stopped");
        })
    }

    fn entry_notify(&self, task_id: &TaskId) -> Result<Arc<Notify>, TaskError> {
        self.inner
            .tasks
            .get(task_id)
            .map(|entry| entry.notify.clone())
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.clone(),
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
