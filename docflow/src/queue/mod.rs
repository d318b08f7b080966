//! Task-queue collaborator.
//!
//! The engine only needs two capabilities from a queue: accept a stage
//! invocation and report its native status. Chaining is push-based: the
//! coordinator enqueues the next link once the previous one checkpointed.

mod memory;
mod worker;

pub use memory::{InMemoryTaskQueue, QueuedTask};
pub use worker::WorkerPool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{JobId, StageResult, TaskState};
use crate::errors::Result;
use crate::executor::StagePolicy;

/// Opaque handle of one enqueued invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Generates a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Payload of one queued stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInvocation {
    /// The job the stage belongs to.
    pub job_id: JobId,
    /// The stage to run.
    pub stage: String,
    /// Output of the previous stage, or the job's initial input.
    pub input: StageResult,
}

impl StageInvocation {
    /// Creates an invocation.
    #[must_use]
    pub fn new(job_id: JobId, stage: impl Into<String>, input: StageResult) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            input,
        }
    }
}

/// Per-invocation limits handed to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Soft deadline of one attempt.
    pub soft_timeout: Duration,
    /// Hard deadline of one attempt.
    pub hard_timeout: Duration,
    /// Retries after the initial attempt.
    pub max_retries: usize,
    /// Base delay between attempts.
    pub retry_delay: Duration,
}

impl From<&StagePolicy> for EnqueueOptions {
    fn from(policy: &StagePolicy) -> Self {
        Self {
            soft_timeout: policy.soft_timeout,
            hard_timeout: policy.hard_timeout,
            max_retries: policy.max_retries,
            retry_delay: policy.retry_delay,
        }
    }
}

/// Queue-native status of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current state.
    pub state: TaskState,
    /// Error message when the invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the invocation was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    /// Status of a freshly enqueued invocation.
    #[must_use]
    pub fn pending() -> Self {
        let now = Utc::now();
        Self {
            state: TaskState::Pending,
            error: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Returns true once the invocation finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}

/// A queue of stage invocations with at-least-once delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues an invocation and returns its handle.
    async fn enqueue(&self, invocation: StageInvocation, options: EnqueueOptions) -> Result<TaskHandle>;

    /// Returns the native status of an invocation, if the queue still knows it.
    async fn status(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_policy() {
        let options = EnqueueOptions::from(&StagePolicy::embed());
        assert_eq!(options.soft_timeout, Duration::from_secs(300));
        assert_eq!(options.hard_timeout, Duration::from_secs(420));
        assert_eq!(options.max_retries, 2);
    }

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(TaskHandle::new(), TaskHandle::new());
        assert_eq!(TaskHandle::from("abc").to_string(), "abc");
    }
}
