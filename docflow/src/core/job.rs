//! Job identity and job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::JobStatus;
use crate::queue::TaskHandle;

/// Opaque, globally unique identifier of one pipeline submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a new random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `n` characters, used to derive short record ids.
    #[must_use]
    pub fn short(&self, n: usize) -> &str {
        let end = self.0.char_indices().nth(n).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The persisted record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The job id.
    pub id: JobId,
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// The stage currently enqueued or running.
    pub current_stage: Option<String>,
    /// Overall status.
    pub status: JobStatus,
    /// Handle of the most recently enqueued stage invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_handle: Option<TaskHandle>,
    /// Items processed per stage, filled in on completion.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub summary: BTreeMap<String, usize>,
    /// Error message of the terminal failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job.
    #[must_use]
    pub fn new(id: JobId, stages: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            stages,
            current_stage: None,
            status: JobStatus::Pending,
            current_handle: None,
            summary: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the job has completed or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the position of a stage in the sequence.
    #[must_use]
    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    /// Returns the stage that follows `stage`, if any.
    #[must_use]
    pub fn next_stage(&self, stage: &str) -> Option<&str> {
        self.stage_index(stage)
            .and_then(|i| self.stages.get(i + 1))
            .map(String::as_str)
    }

    /// Returns the first stage.
    #[must_use]
    pub fn first_stage(&self) -> Option<&str> {
        self.stages.first().map(String::as_str)
    }

    /// Updates the status and touches `updated_at`.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages() -> Vec<String> {
        vec!["extract".to_string(), "chunk".to_string(), "embed".to_string()]
    }

    #[test]
    fn test_job_id_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_job_id_short() {
        let id = JobId::from("abcdef123456");
        assert_eq!(id.short(8), "abcdef12");
        assert_eq!(JobId::from("abc").short(8), "abc");
    }

    #[test]
    fn test_job_navigation() {
        let job = Job::new(JobId::new(), stages());

        assert_eq!(job.first_stage(), Some("extract"));
        assert_eq!(job.next_stage("extract"), Some("chunk"));
        assert_eq!(job.next_stage("embed"), None);
        assert_eq!(job.stage_index("chunk"), Some(1));
        assert_eq!(job.next_stage("missing"), None);
    }

    #[test]
    fn test_job_status_update() {
        let mut job = Job::new(JobId::new(), stages());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.is_terminal());

        job.set_status(JobStatus::Failed);
        assert!(job.is_terminal());
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_job_id_serializes_transparently() {
        let id = JobId::from("job-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""job-1""#);
    }
}
