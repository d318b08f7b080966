//! Notification events recorded in a job's event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, Severity};

/// Whether an event was produced by a stage or by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    /// Produced by a stage executor.
    #[default]
    Stage,
    /// Produced by the pipeline coordinator.
    Pipeline,
}

/// A status-change notification.
///
/// Events are append-only and returned most-recent-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// The job this event belongs to.
    pub job_id: JobId,
    /// The stage the event is attributed to.
    pub stage: String,
    /// Event severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Structured detail.
    #[serde(default)]
    pub detail: serde_json::Value,
    /// Short machine-readable tags (e.g. "timeout", "resumed").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Stage-level or pipeline-level.
    #[serde(default)]
    pub scope: EventScope,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        job_id: JobId,
        stage: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            severity,
            message: message.into(),
            detail: serde_json::Value::Null,
            tags: Vec::new(),
            scope: EventScope::Stage,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage-level event.
    #[must_use]
    pub fn stage(
        job_id: JobId,
        stage: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self::new(job_id, stage, severity, message)
    }

    /// Creates a pipeline-level event.
    #[must_use]
    pub fn pipeline(
        job_id: JobId,
        stage: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scope: EventScope::Pipeline,
            ..Self::new(job_id, stage, severity, message)
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Returns true if the event carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Returns true if the event was produced by the coordinator.
    #[must_use]
    pub fn is_pipeline_level(&self) -> bool {
        self.scope == EventScope::Pipeline
    }
}
