//! In-process task queue.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{EnqueueOptions, StageInvocation, TaskHandle, TaskQueue, TaskStatus};
use crate::core::TaskState;
use crate::errors::{PipelineError, Result};

/// An invocation waiting for a worker.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// Handle returned at enqueue time.
    pub handle: TaskHandle,
    /// The invocation payload.
    pub invocation: StageInvocation,
    /// Limits requested at enqueue time.
    pub options: EnqueueOptions,
}

/// How long a finished task's status stays queryable by default.
pub const DEFAULT_STATUS_RETENTION: Duration = Duration::from_secs(3600);

/// Unbounded in-memory queue backed by an mpsc channel.
///
/// Tracks the native status of every handle it issued until the task has been
/// finished for longer than the retention window. Workers share the receiving
/// end, so each task is delivered to exactly one of them.
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    statuses: DashMap<TaskHandle, TaskStatus>,
    pending: AtomicUsize,
    retention: Duration,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            statuses: DashMap::new(),
            pending: AtomicUsize::new(0),
            retention: DEFAULT_STATUS_RETENTION,
        }
    }

    /// Sets how long finished statuses are kept.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Creates an empty queue behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of tasks enqueued but not yet taken by a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits for the next task. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<QueuedTask> {
        let task = self.receiver.lock().await.recv().await;
        if task.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    /// Takes the next task without waiting.
    pub async fn try_next(&self) -> Option<QueuedTask> {
        let task = self.receiver.lock().await.try_recv().ok();
        if task.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    /// Records that a worker picked up `handle`.
    pub fn mark_started(&self, handle: &TaskHandle) {
        self.set_state(handle, TaskState::Started, None);
    }

    /// Records the outcome of `handle` and evicts expired statuses.
    pub fn mark_finished(&self, handle: &TaskHandle, outcome: std::result::Result<(), String>) {
        match outcome {
            Ok(()) => self.set_state(handle, TaskState::Success, None),
            Err(error) => self.set_state(handle, TaskState::Failure, Some(error)),
        }
        self.purge_finished();
    }

    /// Number of statuses currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.statuses.len()
    }

    /// Drops statuses of tasks finished longer ago than the retention window.
    ///
    /// Returns how many were evicted. Pending and started tasks are kept.
    pub fn purge_finished(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };

        let before = self.statuses.len();
        self.statuses
            .retain(|_, status| !(status.is_ready() && status.updated_at <= cutoff));
        let evicted = before.saturating_sub(self.statuses.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.statuses.len(), "Finished task statuses evicted");
        }
        evicted
    }

    fn set_state(&self, handle: &TaskHandle, state: TaskState, error: Option<String>) {
        if let Some(mut status) = self.statuses.get_mut(handle) {
            status.state = state;
            status.error = error;
            status.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, invocation: StageInvocation, options: EnqueueOptions) -> Result<TaskHandle> {
        let handle = TaskHandle::new();
        debug!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            handle = %handle,
            "Task enqueued"
        );

        self.statuses.insert(handle.clone(), TaskStatus::pending());
        self.pending.fetch_add(1, Ordering::SeqCst);

        let task = QueuedTask {
            handle: handle.clone(),
            invocation,
            options,
        };
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.statuses.remove(&handle);
            return Err(PipelineError::Queue("queue is closed".to_string()));
        }

        Ok(handle)
    }

    async fn status(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>> {
        Ok(self.statuses.get(handle).map(|s| s.value().clone()))
    }
}
