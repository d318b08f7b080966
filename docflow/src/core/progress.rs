//! Progress snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobStatus};

/// Stage name recorded when a job is submitted.
pub const PIPELINE_START: &str = "pipeline-start";
/// Stage name recorded when a job completes.
pub const PIPELINE_COMPLETE: &str = "pipeline-complete";
/// Stage name recorded when a job fails.
pub const PIPELINE_FAILED: &str = "pipeline-failed";

/// The most recent known state of a job.
///
/// At most one snapshot is live per job; every write replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// The job this snapshot belongs to.
    pub job_id: JobId,
    /// The stage that wrote the snapshot.
    pub stage: String,
    /// Completion percentage in `[0, 100]`.
    pub percent: u8,
    /// Arbitrary structured detail.
    #[serde(default)]
    pub detail: serde_json::Value,
    /// When the snapshot was written.
    pub timestamp: DateTime<Utc>,
    /// Job status at the time of writing.
    pub status: JobStatus,
}

impl ProgressSnapshot {
    /// Creates a snapshot, clamping `percent` to 100.
    #[must_use]
    pub fn new(
        job_id: JobId,
        stage: impl Into<String>,
        percent: u8,
        detail: serde_json::Value,
        status: JobStatus,
    ) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            percent: percent.min(100),
            detail,
            timestamp: Utc::now(),
            status,
        }
    }

    /// Creates a `processing` snapshot.
    #[must_use]
    pub fn processing(
        job_id: JobId,
        stage: impl Into<String>,
        percent: u8,
        detail: serde_json::Value,
    ) -> Self {
        Self::new(job_id, stage, percent, detail, JobStatus::Processing)
    }

    /// Returns true if the snapshot was written by a resumed stage.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.detail
            .get("resumed")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
