//! The pipeline coordinator.
//!
//! Submission writes the job record, the `pipeline-start` snapshot and event,
//! then enqueues the first stage. Each queued invocation comes back through
//! [`PipelineCoordinator::handle`], which runs the stage's executor and either
//! enqueues the next stage, completes the job, or fails it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::StageRegistry;
use crate::core::{
    Job, JobId, JobStatus, NotificationEvent, ProgressSnapshot, Severity, StageResult,
    PIPELINE_COMPLETE, PIPELINE_FAILED, PIPELINE_START,
};
use crate::errors::{PipelineError, PipelineValidationError, Result};
use crate::executor::StageOutcome;
use crate::queue::{EnqueueOptions, StageInvocation, TaskHandle, TaskQueue};
use crate::store::{CheckpointStore, EventLog};

/// What happened to a handled invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// The stage succeeded and the next one was enqueued.
    Enqueued {
        /// The completed stage.
        stage: String,
        /// The stage that was enqueued.
        next_stage: String,
        /// Handle of the enqueued invocation.
        handle: TaskHandle,
    },
    /// The last stage succeeded.
    Completed {
        /// Items processed per stage.
        summary: BTreeMap<String, usize>,
    },
    /// A stage failed terminally.
    Failed {
        /// The failing stage.
        stage: String,
        /// The terminal error message.
        error: String,
    },
    /// The invocation was ignored because the job already finished.
    Skipped {
        /// Why the invocation was ignored.
        reason: String,
    },
}

/// Sequences stage executors into jobs.
pub struct PipelineCoordinator {
    registry: StageRegistry,
    queue: Arc<dyn TaskQueue>,
    checkpoints: CheckpointStore,
    events: EventLog,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PipelineCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        registry: StageRegistry,
        queue: Arc<dyn TaskQueue>,
        checkpoints: CheckpointStore,
        events: EventLog,
    ) -> Self {
        Self {
            registry,
            queue,
            checkpoints,
            events,
        }
    }

    /// The registered stages.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The checkpoint store.
    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// The event log.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The task queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Submits a new job running `stages` in order over `input`.
    pub async fn submit(&self, stages: Vec<String>, input: StageResult) -> Result<JobId> {
        self.registry.validate(&stages)?;
        let job = Job::new(JobId::new(), stages);
        let job_id = job.id.clone();
        self.start(job, input).await?;
        Ok(job_id)
    }

    /// Restarts an existing job with the same id.
    ///
    /// Stages that already have checkpoints resume instead of running again.
    pub async fn resubmit(&self, job_id: &JobId, input: StageResult) -> Result<()> {
        let mut job = self
            .checkpoints
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))?;
        self.registry.validate(&job.stages)?;

        info!(job_id = %job_id, previous_status = %job.status, "Resubmitting job");
        job.current_stage = None;
        job.current_handle = None;
        job.summary.clear();
        job.error = None;
        job.set_status(JobStatus::Pending);
        self.start(job, input).await
    }

    async fn start(&self, mut job: Job, input: StageResult) -> Result<()> {
        let first = job
            .first_stage()
            .map(str::to_string)
            .ok_or_else(PipelineValidationError::empty)?;

        self.checkpoints.put_job(&job).await?;

        let snapshot = ProgressSnapshot::new(
            job.id.clone(),
            PIPELINE_START,
            0,
            json!({"stages": job.stages, "input": input.kind()}),
            JobStatus::Pending,
        );
        self.checkpoints.put_progress(&job.id, &snapshot).await?;

        let event = NotificationEvent::pipeline(
            job.id.clone(),
            PIPELINE_START,
            Severity::Success,
            format!("Pipeline started with {} stages", job.stages.len()),
        )
        .with_detail(json!({"stages": job.stages}));
        self.events.append(&job.id, &event).await?;

        let handle = self.enqueue(&job.id, &first, input).await?;
        job.current_stage = Some(first.clone());
        job.current_handle = Some(handle);
        job.updated_at = chrono::Utc::now();
        self.checkpoints.put_job(&job).await?;

        info!(job_id = %job.id, first_stage = %first, stages = ?job.stages, "Pipeline submitted");
        Ok(())
    }

    async fn enqueue(&self, job_id: &JobId, stage: &str, input: StageResult) -> Result<TaskHandle> {
        let executor = self
            .registry
            .get(stage)
            .ok_or_else(|| PipelineValidationError::unknown_stages(vec![stage.to_string()]))?;
        let options = EnqueueOptions::from(executor.policy());
        self.queue
            .enqueue(StageInvocation::new(job_id.clone(), stage, input), options)
            .await
    }

    /// Runs one queued stage invocation and advances the job.
    ///
    /// A terminal stage failure is reported as [`Disposition::Failed`]; an
    /// `Err` means the coordinator itself could not do its bookkeeping.
    pub async fn handle(&self, invocation: StageInvocation) -> Result<Disposition> {
        let StageInvocation { job_id, stage, input } = invocation;

        let mut job = self
            .checkpoints
            .get_job(&job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))?;

        if job.is_terminal() {
            warn!(job_id = %job_id, stage = %stage, status = %job.status, "Ignoring invocation for finished job");
            return Ok(Disposition::Skipped {
                reason: format!("job is already {}", job.status),
            });
        }

        let current = job.current_stage.as_deref().and_then(|c| job.stage_index(c));
        if let (Some(current), Some(incoming)) = (current, job.stage_index(&stage)) {
            if incoming < current {
                warn!(
                    job_id = %job_id,
                    stage = %stage,
                    current_stage = ?job.current_stage,
                    "Ignoring stale delivery of an already handed-off stage"
                );
                return Ok(Disposition::Skipped {
                    reason: format!("stage {stage} already handed off"),
                });
            }
        }

        let executor = self
            .registry
            .get(&stage)
            .ok_or_else(|| PipelineValidationError::unknown_stages(vec![stage.clone()]))?;

        if job.status == JobStatus::Pending {
            job.set_status(JobStatus::Processing);
        }
        job.current_stage = Some(stage.clone());
        self.checkpoints.put_job(&job).await?;

        let next = job.next_stage(&stage).map(str::to_string);
        match (executor.execute(&job_id, &input).await, next) {
            (Ok(outcome), Some(next)) => self.hand_off(job, &stage, next, outcome).await,
            (Ok(outcome), None) => self.complete(job, outcome).await,
            (Err(err), _) => Ok(self.fail(job, &stage, &err).await),
        }
    }

    async fn hand_off(&self, mut job: Job, stage: &str, next: String, outcome: StageOutcome) -> Result<Disposition> {
        let event = NotificationEvent::pipeline(
            job.id.clone(),
            stage,
            Severity::Success,
            format!("Stage {stage} handed off to {next}"),
        )
        .with_tag("handoff")
        .with_detail(json!({
            "next_stage": next,
            "resumed": outcome.resumed,
            "attempts": outcome.attempts,
        }));
        self.events.append(&job.id, &event).await?;

        let handle = self.enqueue(&job.id, &next, outcome.result).await?;
        job.current_stage = Some(next.clone());
        job.current_handle = Some(handle.clone());
        job.updated_at = chrono::Utc::now();
        self.checkpoints.put_job(&job).await?;

        info!(job_id = %job.id, stage, next_stage = %next, "Next stage enqueued");
        Ok(Disposition::Enqueued {
            stage: stage.to_string(),
            next_stage: next,
            handle,
        })
    }

    async fn complete(&self, mut job: Job, outcome: StageOutcome) -> Result<Disposition> {
        let mut summary = BTreeMap::new();
        for stage in &job.stages {
            let count = match self.checkpoints.get(&job.id, stage).await? {
                Some(result) => result.item_count(),
                None => 0,
            };
            summary.insert(stage.clone(), count);
        }
        if let Some(last) = job.stages.last() {
            summary.insert(last.clone(), outcome.result.item_count());
        }

        job.summary = summary.clone();
        job.current_stage = None;
        job.set_status(JobStatus::Completed);
        self.checkpoints.put_job(&job).await?;

        let snapshot = ProgressSnapshot::new(
            job.id.clone(),
            PIPELINE_COMPLETE,
            100,
            json!({"summary": summary}),
            JobStatus::Completed,
        );
        self.checkpoints.put_progress(&job.id, &snapshot).await?;

        let event = NotificationEvent::pipeline(
            job.id.clone(),
            PIPELINE_COMPLETE,
            Severity::Success,
            format!("Pipeline completed: {} stages", job.stages.len()),
        )
        .with_detail(json!({"summary": summary}));
        self.events.append(&job.id, &event).await?;

        info!(job_id = %job.id, summary = ?summary, "Pipeline completed");
        Ok(Disposition::Completed { summary })
    }

    /// Records a terminal failure. Store errors are logged since the job is already lost.
    async fn fail(&self, mut job: Job, stage: &str, err: &PipelineError) -> Disposition {
        error!(job_id = %job.id, stage, error = %err, "Pipeline failed");

        job.error = Some(err.to_string());
        job.set_status(JobStatus::Failed);
        if let Err(e) = self.checkpoints.put_job(&job).await {
            error!(job_id = %job.id, error = %e, "Failed to record job failure");
        }

        let percent = match self.checkpoints.get_progress(&job.id).await {
            Ok(Some(snapshot)) => snapshot.percent,
            _ => 0,
        };
        let snapshot = ProgressSnapshot::new(
            job.id.clone(),
            PIPELINE_FAILED,
            percent,
            json!({"stage": stage, "error": err.to_string()}),
            JobStatus::Failed,
        );
        if let Err(e) = self.checkpoints.put_progress(&job.id, &snapshot).await {
            error!(job_id = %job.id, error = %e, "Failed to record failure progress");
        }

        let mut detail = json!(err.to_dict());
        detail["stage"] = json!(stage);
        let event = NotificationEvent::pipeline(
            job.id.clone(),
            PIPELINE_FAILED,
            Severity::Error,
            format!("Pipeline failed at stage {stage}: {err}"),
        )
        .with_tag(err.kind().tag())
        .with_detail(detail);
        if let Err(e) = self.events.append(&job.id, &event).await {
            error!(job_id = %job.id, error = %e, "Failed to record failure notification");
        }

        Disposition::Failed {
            stage: stage.to_string(),
            error: err.to_string(),
        }
    }
}
