//! Per-attempt context handed to a stage body.

use parking_lot::Mutex;
use tracing::{debug, info};

use super::AbortSignal;
use crate::core::{JobId, NotificationEvent, ProgressSnapshot, Severity};
use crate::errors::Result;
use crate::store::{CheckpointStore, EventLog};

/// Capabilities available to a stage body during one attempt.
///
/// Progress written through [`StageContext::report_progress`] never moves
/// backwards within the attempt: a lower value is replaced by the highest
/// value reported so far.
#[derive(Debug)]
pub struct StageContext {
    job_id: JobId,
    stage_name: String,
    attempt: usize,
    checkpoints: CheckpointStore,
    events: EventLog,
    abort: AbortSignal,
    last_percent: Mutex<Option<u8>>,
}

impl StageContext {
    /// Creates the context of attempt `attempt` (1-based).
    #[must_use]
    pub fn new(
        job_id: JobId,
        stage_name: impl Into<String>,
        attempt: usize,
        checkpoints: CheckpointStore,
        events: EventLog,
    ) -> Self {
        Self {
            job_id,
            stage_name: stage_name.into(),
            attempt,
            checkpoints,
            events,
            abort: AbortSignal::new(),
            last_percent: Mutex::new(None),
        }
    }

    /// The job being processed.
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The running stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// The 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The signal raised at the soft deadline.
    #[must_use]
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Returns true once the soft deadline has passed.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Highest percentage reported in this attempt.
    #[must_use]
    pub fn last_percent(&self) -> Option<u8> {
        *self.last_percent.lock()
    }

    /// Publishes a progress snapshot and returns the percentage actually written.
    pub async fn report_progress(&self, percent: u8, detail: serde_json::Value) -> Result<u8> {
        let percent = {
            let mut last = self.last_percent.lock();
            let next = last.map_or(percent, |prev| prev.max(percent)).min(100);
            *last = Some(next);
            next
        };

        let snapshot = ProgressSnapshot::processing(self.job_id.clone(), &self.stage_name, percent, detail);
        self.checkpoints.put_progress(&self.job_id, &snapshot).await?;

        if percent == 100 {
            info!(job_id = %self.job_id, stage = %self.stage_name, attempt = self.attempt, "Stage body finished");
        } else {
            debug!(job_id = %self.job_id, stage = %self.stage_name, percent, "Progress reported");
        }
        Ok(percent)
    }

    /// Appends a warning notification for this stage.
    pub async fn warn(&self, message: impl Into<String>, detail: serde_json::Value) -> Result<()> {
        let event = NotificationEvent::stage(self.job_id.clone(), &self.stage_name, Severity::Warning, message)
            .with_detail(detail);
        self.events.append(&self.job_id, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::{InMemoryKeyValueStore, KeyValueStore};
    use std::sync::Arc;

    fn context() -> (StageContext, CheckpointStore, EventLog) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let config = StoreConfig::default();
        let checkpoints = CheckpointStore::new(kv.clone(), &config);
        let events = EventLog::new(kv, &config);
        let ctx = StageContext::new(JobId::from("job-1"), "embed", 1, checkpoints.clone(), events.clone());
        (ctx, checkpoints, events)
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (ctx, checkpoints, _) = context();

        assert_eq!(ctx.report_progress(40, serde_json::Value::Null).await.unwrap(), 40);
        assert_eq!(ctx.report_progress(20, serde_json::Value::Null).await.unwrap(), 40);
        assert_eq!(ctx.report_progress(90, serde_json::Value::Null).await.unwrap(), 90);

        let live = checkpoints.get_progress(ctx.job_id()).await.unwrap().unwrap();
        assert_eq!(live.percent, 90);
        assert_eq!(live.stage, "embed");
    }

    #[tokio::test]
    async fn test_progress_clamped_to_hundred() {
        let (ctx, _, _) = context();
        assert_eq!(ctx.report_progress(250, serde_json::Value::Null).await.unwrap(), 100);
        assert_eq!(ctx.last_percent(), Some(100));
    }

    #[tokio::test]
    async fn test_warn_appends_warning_event() {
        let (ctx, _, events) = context();

        ctx.warn("Embedding progress: 10/30", serde_json::json!({"processed": 10}))
            .await
            .unwrap();

        let recent = events.recent(ctx.job_id(), None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].severity, Severity::Warning);
        assert_eq!(recent[0].stage, "embed");
        assert_eq!(recent[0].detail["processed"], 10);
    }

    #[test]
    fn test_abort_visible_through_context() {
        let (ctx, _, _) = context();
        assert!(!ctx.is_aborted());

        ctx.abort_signal().abort("soft deadline");
        assert!(ctx.is_aborted());
    }
}
