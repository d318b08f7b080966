//! The stage executor state machine.
//!
//! ```text
//! NotStarted -> Checking -> Resumed
//!                        -> Running -> Succeeded
//!                                   -> Retrying -> Checking
//!                                   -> Failed
//! ```
//!
//! Every attempt starts in `Checking`, so a checkpoint written by a duplicate
//! delivery between two attempts short-circuits the retry.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{ExecutorState, JobId, NotificationEvent, ProgressSnapshot, Severity, StageResult};
use crate::errors::{Deadline, ErrorKind, PipelineError, Result};
use crate::observability::StageTimer;
use crate::stages::{StageBody, StageContext};
use crate::store::{CheckpointStore, EventLog};

use super::StagePolicy;

/// Result of a successful stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    /// The stage's output.
    pub result: StageResult,
    /// True if the output came from an existing checkpoint.
    pub resumed: bool,
    /// Attempts made, including the one that succeeded or resumed.
    pub attempts: usize,
}

/// Wraps one stage body with its policy and the stores it reports to.
pub struct StageExecutor {
    body: Arc<dyn StageBody>,
    policy: StagePolicy,
    checkpoints: CheckpointStore,
    events: EventLog,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("stage", &self.body.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    Resumed(StageResult),
    Ran(StageResult),
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        body: Arc<dyn StageBody>,
        policy: StagePolicy,
        checkpoints: CheckpointStore,
        events: EventLog,
    ) -> Self {
        Self {
            body,
            policy,
            checkpoints,
            events,
        }
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.body.name()
    }

    /// The stage policy.
    #[must_use]
    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    /// Runs the stage for `job_id` until it succeeds, resumes, or fails terminally.
    ///
    /// Retryable failures are retried up to `max_retries` times; the error
    /// returned after the last attempt is [`PipelineError::RetriesExhausted`].
    /// Non-retryable failures are returned as-is after the first attempt.
    pub async fn execute(&self, job_id: &JobId, input: &StageResult) -> Result<StageOutcome> {
        let stage = self.name().to_string();
        let total = self.policy.total_attempts();
        let mut state = ExecutorState::NotStarted;
        let mut attempt = 0;

        loop {
            attempt += 1;
            advance(&mut state, ExecutorState::Checking, job_id, &stage);

            let err = match self.attempt(job_id, input, attempt, &mut state).await {
                Ok(Attempt::Resumed(result)) => {
                    advance(&mut state, ExecutorState::Resumed, job_id, &stage);
                    return Ok(StageOutcome {
                        result,
                        resumed: true,
                        attempts: attempt,
                    });
                }
                Ok(Attempt::Ran(result)) => {
                    advance(&mut state, ExecutorState::Succeeded, job_id, &stage);
                    return Ok(StageOutcome {
                        result,
                        resumed: false,
                        attempts: attempt,
                    });
                }
                Err(err) => err.in_stage(&stage),
            };

            self.record_failure(job_id, attempt, &err).await;

            if !err.is_retryable() {
                advance(&mut state, ExecutorState::Failed, job_id, &stage);
                error!(job_id = %job_id, stage = %stage, attempt, error = %err, "Stage failed without retry");
                return Err(err);
            }

            if attempt >= total {
                advance(&mut state, ExecutorState::Failed, job_id, &stage);
                if err.kind() == ErrorKind::StorageUnavailable {
                    error!(
                        alert = "storage_unavailable",
                        job_id = %job_id,
                        stage = %stage,
                        attempts = attempt,
                        error = %err,
                        "Checkpoint store unreachable after every attempt"
                    );
                }
                error!(job_id = %job_id, stage = %stage, attempts = attempt, error = %err, "Stage retries exhausted");
                return Err(PipelineError::RetriesExhausted {
                    stage,
                    attempts: attempt,
                    last_kind: err.kind(),
                    last_error: err.to_string(),
                });
            }

            advance(&mut state, ExecutorState::Retrying, job_id, &stage);
            let delay = self.policy.delay_for(attempt - 1);
            warn!(
                job_id = %job_id,
                stage = %stage,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying stage"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        job_id: &JobId,
        input: &StageResult,
        attempt: usize,
        state: &mut ExecutorState,
    ) -> Result<Attempt> {
        let stage = self.name();

        if let Some(result) = self.checkpoints.get(job_id, stage).await? {
            self.publish_resume(job_id, &result, attempt).await?;
            return Ok(Attempt::Resumed(result));
        }

        advance(state, ExecutorState::Running, job_id, stage);
        info!(job_id = %job_id, stage, attempt, "Stage attempt started");

        let timer = StageTimer::start(stage);
        let ctx = Arc::new(StageContext::new(
            job_id.clone(),
            stage,
            attempt,
            self.checkpoints.clone(),
            self.events.clone(),
        ));
        let result = self.run_body(Arc::clone(&ctx), input.clone()).await?;

        self.checkpoints
            .put(job_id, stage, &result, self.checkpoints.checkpoint_ttl())
            .await?;
        ctx.report_progress(100, json!({"items": result.item_count()})).await?;

        let event = NotificationEvent::stage(
            job_id.clone(),
            stage,
            Severity::Success,
            format!("Stage {stage} completed: {} {}", result.item_count(), result.kind()),
        )
        .with_detail(json!({
            "attempt": attempt,
            "duration_ms": timer.elapsed_ms(),
            "items": result.item_count(),
        }));
        self.events.append(job_id, &event).await?;

        info!(
            job_id = %job_id,
            stage,
            attempt,
            duration_ms = timer.elapsed_ms(),
            items = result.item_count(),
            "Stage completed"
        );
        Ok(Attempt::Ran(result))
    }

    /// Runs the body under the soft and hard deadlines.
    async fn run_body(&self, ctx: Arc<StageContext>, input: StageResult) -> Result<StageResult> {
        let stage = self.name().to_string();
        let body = Arc::clone(&self.body);
        let task_ctx = Arc::clone(&ctx);
        let mut handle = tokio::spawn(async move { body.run(&task_ctx, &input).await });

        let soft = self.policy.soft_timeout;
        if let Ok(joined) = tokio::time::timeout(soft, &mut handle).await {
            return match joined {
                Ok(result) => result,
                Err(e) => Err(PipelineError::transient(&stage, format!("stage body panicked: {e}"))),
            };
        }

        ctx.abort_signal()
            .abort(format!("soft deadline of {} ms exceeded", soft.as_millis()));
        warn!(job_id = %ctx.job_id(), stage = %stage, attempt = ctx.attempt(), "Soft deadline exceeded, abort signalled");

        let deadline = match tokio::time::timeout(self.policy.grace_period(), &mut handle).await {
            Ok(_) => (Deadline::Soft, soft),
            Err(_) => {
                handle.abort();
                warn!(job_id = %ctx.job_id(), stage = %stage, attempt = ctx.attempt(), "Hard deadline exceeded, body terminated");
                (Deadline::Hard, self.policy.hard_timeout)
            }
        };

        Err(PipelineError::Timeout {
            stage,
            deadline: deadline.0,
            limit_ms: u64::try_from(deadline.1.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn publish_resume(&self, job_id: &JobId, result: &StageResult, attempt: usize) -> Result<()> {
        let stage = self.name();
        info!(job_id = %job_id, stage, attempt, "Checkpoint found, resuming");

        let snapshot = ProgressSnapshot::processing(
            job_id.clone(),
            stage,
            100,
            json!({"resumed": true, "items": result.item_count()}),
        );
        self.checkpoints.put_progress(job_id, &snapshot).await?;

        let event = NotificationEvent::stage(
            job_id.clone(),
            stage,
            Severity::Success,
            format!("Stage {stage} resumed from checkpoint"),
        )
        .with_tag("resumed")
        .with_detail(json!({"attempt": attempt, "items": result.item_count()}));
        self.events.append(job_id, &event).await
    }

    /// Appends the per-attempt error event. A store failure here is logged, not raised.
    async fn record_failure(&self, job_id: &JobId, attempt: usize, err: &PipelineError) {
        let stage = self.name();
        let mut detail = json!(err.to_dict());
        detail["attempt"] = json!(attempt);
        detail["max_attempts"] = json!(self.policy.total_attempts());

        let event = NotificationEvent::stage(job_id.clone(), stage, Severity::Error, err.to_string())
            .with_tag(err.kind().tag())
            .with_detail(detail);

        if let Err(append_err) = self.events.append(job_id, &event).await {
            warn!(
                job_id = %job_id,
                stage,
                error = %append_err,
                "Failed to record stage failure"
            );
        }
    }
}

fn advance(state: &mut ExecutorState, next: ExecutorState, job_id: &JobId, stage: &str) {
    debug_assert!(state.can_transition_to(next), "invalid transition {state} -> {next}");
    debug!(job_id = %job_id, stage, from = %state, to = %next, "Executor transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::core::DocumentRef;
    use crate::store::{InMemoryKeyValueStore, KeyValueStore};
    use crate::testing::{assert_event_count, PassthroughStage, ScriptedStage, SlowStage, UnavailableStore};
    use std::time::Duration;

    struct Harness {
        kv: Arc<InMemoryKeyValueStore>,
        checkpoints: CheckpointStore,
        events: EventLog,
    }

    impl Harness {
        fn new() -> Self {
            let kv = Arc::new(InMemoryKeyValueStore::new());
            let shared: Arc<dyn KeyValueStore> = kv.clone();
            let config = StoreConfig::default();
            Self {
                kv,
                checkpoints: CheckpointStore::new(shared.clone(), &config),
                events: EventLog::new(shared, &config),
            }
        }

        fn executor(&self, body: Arc<dyn StageBody>, policy: StagePolicy) -> StageExecutor {
            StageExecutor::new(body, policy, self.checkpoints.clone(), self.events.clone())
        }
    }

    fn quick_policy(retries: usize) -> StagePolicy {
        StagePolicy::new(Duration::from_millis(100), Duration::from_millis(200))
            .with_max_retries(retries)
            .with_retry_delay(Duration::from_millis(5))
    }

    fn input() -> StageResult {
        StageResult::Document(DocumentRef::new("a.txt"))
    }

    #[tokio::test]
    async fn test_success_checkpoints_and_notifies() {
        let h = Harness::new();
        let executor = h.executor(Arc::new(PassthroughStage::new("extract")), quick_policy(0));
        let job = JobId::from("job-1");

        let outcome = executor.execute(&job, &input()).await.unwrap();

        assert!(!outcome.resumed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(h.checkpoints.get(&job, "extract").await.unwrap(), Some(input()));
        assert_eq!(h.checkpoints.get_progress(&job).await.unwrap().unwrap().percent, 100);
        assert_event_count(&h.events, &job, "extract", Severity::Success, 1).await;
    }

    #[tokio::test]
    async fn test_retry_bound_is_exact() {
        let h = Harness::new();
        let body = Arc::new(ScriptedStage::always_failing("embed", ErrorKind::Transient));
        let executor = h.executor(body.clone(), quick_policy(2));
        let job = JobId::from("job-1");

        let err = executor.execute(&job, &input()).await.unwrap_err();

        assert_eq!(body.calls(), 3);
        match err {
            PipelineError::RetriesExhausted { attempts, last_kind, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_kind, ErrorKind::Transient);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_event_count(&h.events, &job, "embed", Severity::Error, 3).await;
        assert!(h.checkpoints.get(&job, "embed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let h = Harness::new();
        let body = Arc::new(ScriptedStage::failing_times("chunk", 1, ErrorKind::Transient));
        let executor = h.executor(body.clone(), quick_policy(1));
        let job = JobId::from("job-1");

        let outcome = executor.execute(&job, &input()).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(body.calls(), 2);
        assert_event_count(&h.events, &job, "chunk", Severity::Error, 1).await;
        assert_event_count(&h.events, &job, "chunk", Severity::Success, 1).await;
    }

    #[tokio::test]
    async fn test_invalid_input_fails_fast() {
        let h = Harness::new();
        let body = Arc::new(ScriptedStage::always_failing("chunk", ErrorKind::InvalidInput));
        let executor = h.executor(body.clone(), quick_policy(3));
        let job = JobId::from("job-1");

        let err = executor.execute(&job, &input()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(body.calls(), 1);

        let events = h.events.recent(&job, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].has_tag("invalid_input"));
    }

    #[tokio::test]
    async fn test_resume_skips_body() {
        let h = Harness::new();
        let body = Arc::new(ScriptedStage::failing_times("chunk", 0, ErrorKind::Transient));
        let executor = h.executor(body.clone(), quick_policy(0));
        let job = JobId::from("job-1");
        let cached = StageResult::Document(DocumentRef::new("cached.txt"));

        h.checkpoints
            .put(&job, "chunk", &cached, Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = executor.execute(&job, &input()).await.unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.result, cached);
        assert_eq!(body.calls(), 0);

        let progress = h.checkpoints.get_progress(&job).await.unwrap().unwrap();
        assert_eq!(progress.percent, 100);
        assert!(progress.is_resumed());

        let events = h.events.recent(&job, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].has_tag("resumed"));
    }

    #[tokio::test]
    async fn test_soft_timeout_signals_abort() {
        let h = Harness::new();
        let body = Arc::new(SlowStage::cooperative("embed", Duration::from_secs(5)));
        let executor = h.executor(body.clone(), quick_policy(0));
        let job = JobId::from("job-1");

        let err = executor.execute(&job, &input()).await.unwrap_err();

        match err {
            PipelineError::RetriesExhausted { last_kind, last_error, .. } => {
                assert_eq!(last_kind, ErrorKind::Timeout);
                assert!(last_error.contains("soft deadline"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(body.aborts_observed(), 1);
        assert_event_count(&h.events, &job, "embed", Severity::Error, 1).await;
    }

    #[tokio::test]
    async fn test_hard_timeout_terminates_body() {
        let h = Harness::new();
        let body = Arc::new(SlowStage::stubborn("embed", Duration::from_secs(5)));
        let executor = h.executor(body, quick_policy(0));
        let job = JobId::from("job-1");

        let started = std::time::Instant::now();
        let err = executor.execute(&job, &input()).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            PipelineError::RetriesExhausted { last_error, .. } => {
                assert!(last_error.contains("hard deadline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_storage_outage_exhausts_retries() {
        let store = Arc::new(UnavailableStore::offline());
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let config = StoreConfig::default();
        let executor = StageExecutor::new(
            Arc::new(PassthroughStage::new("persist")),
            quick_policy(1),
            CheckpointStore::new(shared.clone(), &config),
            EventLog::new(shared, &config),
        );

        let err = executor.execute(&JobId::from("job-1"), &input()).await.unwrap_err();

        match err {
            PipelineError::RetriesExhausted { attempts, last_kind, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_kind, ErrorKind::StorageUnavailable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_storage_outage_raises_alert() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(UnavailableStore::offline());
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let config = StoreConfig::default();
        let executor = StageExecutor::new(
            Arc::new(PassthroughStage::new("persist")),
            quick_policy(1),
            CheckpointStore::new(shared.clone(), &config),
            EventLog::new(shared, &config),
        );
        executor.execute(&JobId::from("job-1"), &input()).await.unwrap_err();

        let alerts: Vec<serde_json::Value> = logs
            .contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|entry: &serde_json::Value| entry["fields"]["alert"] == "storage_unavailable")
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["level"], "ERROR");
        assert_eq!(alerts[0]["fields"]["attempts"], 2);
        assert_eq!(alerts[0]["fields"]["stage"], "persist");
    }

    #[tokio::test]
    async fn test_checkpoint_from_duplicate_delivery_short_circuits_retry() {
        let h = Harness::new();
        let job = JobId::from("job-1");
        let body = Arc::new(
            ScriptedStage::failing_times("chunk", 1, ErrorKind::Transient)
                .with_checkpoint_on_failure(h.checkpoints.clone(), input()),
        );
        let executor = h.executor(body.clone(), quick_policy(2));

        let outcome = executor.execute(&job, &input()).await.unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(body.calls(), 1);
        assert!(h.kv.contains_key("intermediate:job-1:chunk"));
    }
}
