//! Checkpoint store: per-stage results, live progress and job records.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::config::StoreConfig;
use crate::core::{Job, JobId, ProgressSnapshot, StageResult};
use crate::errors::Result;

fn checkpoint_key(job_id: &JobId, stage: &str) -> String {
    format!("intermediate:{job_id}:{stage}")
}

fn progress_key(job_id: &JobId) -> String {
    format!("progress:{job_id}")
}

fn job_key(job_id: &JobId) -> String {
    format!("job:{job_id}")
}

/// Durable record of stage outputs and job progress.
///
/// The presence of a checkpoint for `(job, stage)` means that stage completed
/// at least once; executors treat it as the only resume signal. Writes go
/// straight to the key-value store, so they are visible to the next read.
#[derive(Clone)]
pub struct CheckpointStore {
    kv: Arc<dyn KeyValueStore>,
    progress_ttl: Duration,
    checkpoint_ttl: Duration,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("progress_ttl", &self.progress_ttl)
            .field("checkpoint_ttl", &self.checkpoint_ttl)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Creates a store over `kv` with the configured retention windows.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Self {
        Self {
            kv,
            progress_ttl: config.progress_ttl(),
            checkpoint_ttl: config.checkpoint_ttl(),
        }
    }

    /// Default lifetime of a checkpoint.
    #[must_use]
    pub fn checkpoint_ttl(&self) -> Duration {
        self.checkpoint_ttl
    }

    /// Stores a stage result.
    pub async fn put(&self, job_id: &JobId, stage: &str, result: &StageResult, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(result)?;
        self.kv.set(&checkpoint_key(job_id, stage), raw, ttl).await?;
        info!(job_id = %job_id, stage, kind = result.kind(), "Checkpoint saved");
        Ok(())
    }

    /// Loads a stage result.
    pub async fn get(&self, job_id: &JobId, stage: &str) -> Result<Option<StageResult>> {
        match self.kv.get(&checkpoint_key(job_id, stage)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Replaces the job's live progress snapshot.
    pub async fn put_progress(&self, job_id: &JobId, snapshot: &ProgressSnapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.kv.set(&progress_key(job_id), raw, self.progress_ttl).await?;
        debug!(
            job_id = %job_id,
            stage = %snapshot.stage,
            percent = snapshot.percent,
            "Progress saved"
        );
        Ok(())
    }

    /// Loads the job's live progress snapshot.
    pub async fn get_progress(&self, job_id: &JobId) -> Result<Option<ProgressSnapshot>> {
        match self.kv.get(&progress_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stores the job record.
    pub async fn put_job(&self, job: &Job) -> Result<()> {
        let raw = serde_json::to_string(job)?;
        self.kv.set(&job_key(&job.id), raw, self.checkpoint_ttl).await
    }

    /// Loads the job record.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        match self.kv.get(&job_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
