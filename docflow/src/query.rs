//! Read-only projections over the checkpoint store, event log and queue.
//!
//! Nothing here writes. Missing records surface as [`PipelineError::NotFound`]
//! instead of defaults, so callers can tell "no data yet" from "0%".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::core::{JobId, JobStatus, NotificationEvent, ProgressSnapshot};
use crate::errors::{PipelineError, Result};
use crate::queue::{TaskQueue, TaskStatus};
use crate::store::{CheckpointStore, EventLog};

/// Composite status of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    /// The job.
    pub job_id: JobId,
    /// Overall job status.
    pub status: JobStatus,
    /// The ordered stage list.
    pub stages: Vec<String>,
    /// Stage currently queued or running, if any.
    pub current_stage: Option<String>,
    /// Queue-native status of the current stage invocation.
    pub task: Option<TaskStatus>,
    /// The live progress snapshot.
    pub progress: Option<ProgressSnapshot>,
    /// The most recent notification.
    pub latest: Option<NotificationEvent>,
    /// The most recent notifications, newest first.
    pub recent: Vec<NotificationEvent>,
    /// Total notifications retained for the job.
    pub notification_count: usize,
    /// Items processed per stage, once the job completed.
    pub summary: BTreeMap<String, usize>,
    /// Terminal error message, once the job failed.
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job record last changed.
    pub updated_at: DateTime<Utc>,
}

impl JobStatusView {
    /// Returns true once the job will not change again.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Status queries for submitted jobs.
#[derive(Clone)]
pub struct StatusQuery {
    checkpoints: CheckpointStore,
    events: EventLog,
    queue: Arc<dyn TaskQueue>,
    recent: usize,
}

impl std::fmt::Debug for StatusQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusQuery")
            .field("recent", &self.recent)
            .finish_non_exhaustive()
    }
}

impl StatusQuery {
    /// Creates a query over the given stores.
    #[must_use]
    pub fn new(
        checkpoints: CheckpointStore,
        events: EventLog,
        queue: Arc<dyn TaskQueue>,
        config: &QueryConfig,
    ) -> Self {
        Self {
            checkpoints,
            events,
            queue,
            recent: config.recent_notifications,
        }
    }

    /// Returns the live progress snapshot of `job_id`.
    pub async fn progress_of(&self, job_id: &JobId) -> Result<ProgressSnapshot> {
        self.checkpoints
            .get_progress(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("progress for job {job_id}")))
    }

    /// Returns up to `limit` notifications, newest first.
    ///
    /// An unknown job yields an empty list; the event log keeps no record of
    /// which jobs exist.
    pub async fn notifications_of(&self, job_id: &JobId, limit: Option<usize>) -> Result<Vec<NotificationEvent>> {
        self.events.recent(job_id, limit).await
    }

    /// Builds the composite status view of `job_id`.
    pub async fn status_of(&self, job_id: &JobId) -> Result<JobStatusView> {
        let job = self
            .checkpoints
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))?;

        let task = match &job.current_handle {
            Some(handle) => match self.queue.status(handle).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(job_id = %job_id, handle = %handle, error = %e, "Task status unavailable");
                    None
                }
            },
            None => None,
        };

        let progress = self.checkpoints.get_progress(job_id).await?;
        let recent = self.events.recent(job_id, Some(self.recent)).await?;
        let notification_count = self.events.count(job_id).await?;

        debug!(job_id = %job_id, status = %job.status, notifications = notification_count, "Status queried");

        Ok(JobStatusView {
            job_id: job.id,
            status: job.status,
            stages: job.stages,
            current_stage: job.current_stage,
            task,
            progress,
            latest: recent.first().cloned(),
            recent,
            notification_count,
            summary: job.summary,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }
}
