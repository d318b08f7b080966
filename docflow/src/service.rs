//! The document processing service exposed to an API layer.

use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::core::{DocumentRef, JobId, NotificationEvent, ProgressSnapshot, StageResult};
use crate::document::{
    ChunkTextStage, EmbedChunksStage, Embedder, ExtractTextStage, PersistChunksStage, VectorSink,
    DOCUMENT_STAGES,
};
use crate::errors::{PipelineError, Result};
use crate::executor::{StageExecutor, StagePolicy};
use crate::pipeline::{PipelineCoordinator, StageRegistry};
use crate::query::{JobStatusView, StatusQuery};
use crate::queue::TaskQueue;
use crate::stages::StageBody;
use crate::store::{CheckpointStore, EventLog, KeyValueStore};

/// Extract, chunk, embed and persist documents as checkpointed jobs.
#[derive(Debug, Clone)]
pub struct DocumentPipelineService {
    coordinator: Arc<PipelineCoordinator>,
    query: StatusQuery,
}

impl DocumentPipelineService {
    /// Wires the four document stages over `kv` and `queue`.
    ///
    /// Stage policies start from the built-in defaults and take overrides from
    /// `config.stages`. Fails if an override resolves to an invalid policy.
    pub fn new(
        config: &PipelineConfig,
        kv: Arc<dyn KeyValueStore>,
        queue: Arc<dyn TaskQueue>,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn VectorSink>,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::new(kv.clone(), &config.store);
        let events = EventLog::new(kv, &config.store);

        let stage = |body: Arc<dyn StageBody>, default: StagePolicy| {
            let policy = config.policy_for(body.name(), default)?;
            Ok::<_, PipelineError>(StageExecutor::new(body, policy, checkpoints.clone(), events.clone()))
        };
        let registry = StageRegistry::new()
            .with(stage(Arc::new(ExtractTextStage::new()), StagePolicy::extract())?)
            .with(stage(Arc::new(ChunkTextStage::new()), StagePolicy::chunk())?)
            .with(stage(Arc::new(EmbedChunksStage::new(embedder)), StagePolicy::embed())?)
            .with(stage(Arc::new(PersistChunksStage::new(sink)), StagePolicy::persist())?);

        let query = StatusQuery::new(checkpoints.clone(), events.clone(), queue.clone(), &config.query);
        let coordinator = Arc::new(PipelineCoordinator::new(registry, queue, checkpoints, events));
        Ok(Self { coordinator, query })
    }

    /// The coordinator, for wiring workers.
    #[must_use]
    pub fn coordinator(&self) -> Arc<PipelineCoordinator> {
        self.coordinator.clone()
    }

    /// Submits the document at `input_ref` and returns its job id.
    pub async fn submit_pipeline(&self, input_ref: impl Into<String>) -> Result<JobId> {
        let doc = DocumentRef::new(input_ref);
        let job_id = self
            .coordinator
            .submit(Self::stages(), StageResult::Document(doc.clone()))
            .await?;
        info!(job_id = %job_id, file = %doc.file_name(), "Document pipeline submitted");
        Ok(job_id)
    }

    /// Restarts `job_id`; stages with checkpoints are not run again.
    pub async fn resubmit(&self, job_id: &JobId, input_ref: impl Into<String>) -> Result<()> {
        self.coordinator
            .resubmit(job_id, StageResult::Document(DocumentRef::new(input_ref)))
            .await
    }

    /// Returns the live progress snapshot, or `NotFound`.
    pub async fn get_progress(&self, job_id: &JobId) -> Result<ProgressSnapshot> {
        self.query.progress_of(job_id).await
    }

    /// Returns up to `limit` notifications, newest first.
    pub async fn get_notifications(&self, job_id: &JobId, limit: Option<usize>) -> Result<Vec<NotificationEvent>> {
        self.query.notifications_of(job_id, limit).await
    }

    /// Returns the composite status view, or `NotFound`.
    pub async fn get_status(&self, job_id: &JobId) -> Result<JobStatusView> {
        self.query.status_of(job_id).await
    }

    fn stages() -> Vec<String> {
        DOCUMENT_STAGES.iter().map(|s| (*s).to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobStatus, Severity, PIPELINE_COMPLETE};
    use crate::document::{HashEmbedder, InMemoryVectorSink, CHUNK, EMBED, EXTRACT, PERSIST};
    use crate::errors::ErrorKind;
    use crate::queue::{InMemoryTaskQueue, WorkerPool};
    use crate::store::InMemoryKeyValueStore;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    struct Harness {
        service: DocumentPipelineService,
        pool: WorkerPool,
        sink: Arc<InMemoryVectorSink>,
    }

    fn harness(config: &PipelineConfig) -> Harness {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let queue = InMemoryTaskQueue::shared();
        let sink = Arc::new(InMemoryVectorSink::new());
        let shared: Arc<dyn TaskQueue> = queue.clone();
        let service = DocumentPipelineService::new(
            config,
            kv,
            shared,
            Arc::new(HashEmbedder::new(16)),
            sink.clone(),
        )
        .unwrap();
        let pool = WorkerPool::new(queue, service.coordinator());
        Harness { service, pool, sink }
    }

    #[tokio::test]
    async fn test_document_runs_through_all_stages() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("x".repeat(1200).as_bytes()).unwrap();
        let h = harness(&PipelineConfig::default());

        let job = h
            .service
            .submit_pipeline(file.path().to_string_lossy())
            .await
            .unwrap();
        assert_eq!(h.pool.run_until_idle().await, 4);

        let view = h.service.get_status(&job).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.summary.get(EXTRACT), Some(&1200));
        assert_eq!(view.summary.get(CHUNK), Some(&3));
        assert_eq!(view.summary.get(EMBED), Some(&3));
        assert_eq!(view.summary.get(PERSIST), Some(&3));
        assert_eq!(h.sink.len(), 3);

        let progress = h.service.get_progress(&job).await.unwrap();
        assert_eq!(progress.stage, PIPELINE_COMPLETE);
        assert_eq!(progress.percent, 100);

        let notifications = h.service.get_notifications(&job, None).await.unwrap();
        assert!(notifications.iter().all(|e| e.severity == Severity::Success));
    }

    #[tokio::test]
    async fn test_missing_document_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&PipelineConfig::default());

        let job = h
            .service
            .submit_pipeline(dir.path().join("missing.pdf").to_string_lossy())
            .await
            .unwrap();
        assert_eq!(h.pool.run_until_idle().await, 1);

        let view = h.service.get_status(&job).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.as_deref().unwrap().contains("file not found"));

        let latest = view.latest.unwrap();
        assert!(latest.has_tag(ErrorKind::InvalidInput.tag()));
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_after_fix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.txt");
        let h = harness(&PipelineConfig::default());

        let job = h.service.submit_pipeline(path.to_string_lossy()).await.unwrap();
        h.pool.run_until_idle().await;
        assert_eq!(h.service.get_status(&job).await.unwrap().status, JobStatus::Failed);

        std::fs::write(&path, "now it exists").unwrap();
        h.service.resubmit(&job, path.to_string_lossy()).await.unwrap();
        h.pool.run_until_idle().await;

        let view = h.service.get_status(&job).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(h.sink.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let h = harness(&PipelineConfig::default());
        let err = h.service.get_progress(&JobId::from("unknown")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_config_overrides_stage_policy() {
        let config = PipelineConfig::from_json_str(r#"{"stages": {"embed": {"max_retries": 7}}}"#).unwrap();
        let h = harness(&config);

        let coordinator = h.service.coordinator();
        let embed = coordinator.registry().get(EMBED).unwrap();
        assert_eq!(embed.policy().max_retries, 7);
        assert_eq!(embed.policy().soft_timeout, StagePolicy::embed().soft_timeout);

        let extract = coordinator.registry().get(EXTRACT).unwrap();
        assert_eq!(extract.policy().max_retries, 3);
    }

    #[test]
    fn test_invalid_override_rejected_at_construction() {
        let config = PipelineConfig::from_json_str(r#"{"stages": {"embed": {"soft_timeout_seconds": 500}}}"#).unwrap();

        let result = DocumentPipelineService::new(
            &config,
            Arc::new(InMemoryKeyValueStore::new()),
            InMemoryTaskQueue::shared(),
            Arc::new(HashEmbedder::new(16)),
            Arc::new(InMemoryVectorSink::new()),
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("embed"));
    }
}
