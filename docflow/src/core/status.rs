//! Job, task and executor status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted; no stage has started yet.
    Pending,
    /// At least one stage has started.
    Processing,
    /// Every stage succeeded.
    Completed,
    /// A stage failed terminally.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Returns true if the job will not change status again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Severity of a notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Something completed.
    Success,
    /// Something noteworthy but not fatal.
    Warning,
    /// Something failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Queue-native status of one enqueued stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker.
    Pending,
    /// Picked up by a worker.
    Started,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Started => write!(f, "started"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl TaskState {
    /// Returns true if the invocation has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// States of the stage executor's state machine.
///
/// `NotStarted -> Checking -> Resumed | Running -> Succeeded | Retrying -> Running | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Invocation received, nothing done yet.
    NotStarted,
    /// Looking up an existing checkpoint.
    Checking,
    /// A checkpoint was found and returned.
    Resumed,
    /// The stage body is executing.
    Running,
    /// The stage body produced a result that was checkpointed.
    Succeeded,
    /// Waiting out the retry delay before re-checking.
    Retrying,
    /// Terminal failure.
    Failed,
}

impl ExecutorState {
    /// Returns true for states that end an invocation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resumed | Self::Succeeded | Self::Failed)
    }

    /// Returns true if the transition `self -> next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Checking)
                | (Self::Checking, Self::Resumed | Self::Running | Self::Retrying | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Retrying | Self::Failed)
                | (Self::Retrying, Self::Checking)
        )
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Checking => "checking",
            Self::Resumed => "resumed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_severity_serialize() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, r#""warning""#);

        let deserialized: Severity = serde_json::from_str(r#""error""#).unwrap();
        assert_eq!(deserialized, Severity::Error);
    }

    #[test]
    fn test_task_state_ready() {
        assert!(TaskState::Success.is_ready());
        assert!(TaskState::Failure.is_ready());
        assert!(!TaskState::Started.is_ready());
    }

    #[test]
    fn test_executor_transitions() {
        assert!(ExecutorState::NotStarted.can_transition_to(ExecutorState::Checking));
        assert!(ExecutorState::Checking.can_transition_to(ExecutorState::Resumed));
        assert!(ExecutorState::Running.can_transition_to(ExecutorState::Retrying));
        assert!(ExecutorState::Retrying.can_transition_to(ExecutorState::Checking));
        assert!(!ExecutorState::Retrying.can_transition_to(ExecutorState::Running));
        assert!(!ExecutorState::Resumed.can_transition_to(ExecutorState::Running));
    }
}
