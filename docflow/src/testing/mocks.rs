//! Scripted stage bodies for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::core::StageResult;
use crate::errors::{Deadline, ErrorKind, PipelineError, Result};
use crate::stages::{StageBody, StageContext};
use crate::store::CheckpointStore;

/// A stage that returns its input unchanged.
#[derive(Debug)]
pub struct PassthroughStage {
    name: String,
    call_count: Mutex<usize>,
}

impl PassthroughStage {
    /// Creates a new passthrough stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call_count: Mutex::new(0),
        }
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl StageBody for PassthroughStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        *self.call_count.lock() += 1;
        ctx.report_progress(50, serde_json::Value::Null).await?;
        Ok(input.clone())
    }
}

/// A stage that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    failures: usize,
    kind: ErrorKind,
    progress: Vec<u8>,
    output: Option<StageResult>,
    checkpoint_on_failure: Option<(CheckpointStore, StageResult)>,
    call_count: Mutex<usize>,
}

impl ScriptedStage {
    /// Fails the first `failures` calls with an error of `kind`.
    #[must_use]
    pub fn failing_times(name: impl Into<String>, failures: usize, kind: ErrorKind) -> Self {
        Self {
            name: name.into(),
            failures,
            kind,
            progress: Vec::new(),
            output: None,
            checkpoint_on_failure: None,
            call_count: Mutex::new(0),
        }
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(name: impl Into<String>, kind: ErrorKind) -> Self {
        Self::failing_times(name, usize::MAX, kind)
    }

    /// Reports these percentages, in order, on every successful call.
    #[must_use]
    pub fn with_progress(mut self, steps: Vec<u8>) -> Self {
        self.progress = steps;
        self
    }

    /// Returns `output` instead of the input on success.
    #[must_use]
    pub fn with_output(mut self, output: StageResult) -> Self {
        self.output = Some(output);
        self
    }

    /// Writes a checkpoint before each failure, as a racing duplicate delivery would.
    #[must_use]
    pub fn with_checkpoint_on_failure(mut self, store: CheckpointStore, result: StageResult) -> Self {
        self.checkpoint_on_failure = Some((store, result));
        self
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.call_count.lock()
    }

    fn error(&self) -> PipelineError {
        let stage = self.name.clone();
        match self.kind {
            ErrorKind::InvalidInput => PipelineError::invalid_input(stage, "scripted invalid input"),
            ErrorKind::Timeout => PipelineError::Timeout {
                stage,
                deadline: Deadline::Soft,
                limit_ms: 0,
            },
            ErrorKind::StorageUnavailable => PipelineError::storage("scripted outage"),
            _ => PipelineError::transient(stage, "scripted failure"),
        }
    }
}

#[async_trait]
impl StageBody for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        let call = {
            let mut count = self.call_count.lock();
            *count += 1;
            *count
        };

        if call <= self.failures {
            if let Some((store, result)) = &self.checkpoint_on_failure {
                store
                    .put(ctx.job_id(), &self.name, result, store.checkpoint_ttl())
                    .await?;
            }
            return Err(self.error());
        }

        for percent in &self.progress {
            ctx.report_progress(*percent, serde_json::Value::Null).await?;
        }
        Ok(self.output.clone().unwrap_or_else(|| input.clone()))
    }
}

/// A stage that takes longer than its deadline.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    cooperative: bool,
    aborts: Mutex<usize>,
}

impl SlowStage {
    /// Sleeps for `delay` but returns early once the abort signal fires.
    #[must_use]
    pub fn cooperative(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            cooperative: true,
            aborts: Mutex::new(0),
        }
    }

    /// Sleeps for `delay` regardless of the abort signal.
    #[must_use]
    pub fn stubborn(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            cooperative: false,
            aborts: Mutex::new(0),
        }
    }

    /// Number of times the body saw the abort signal and stopped.
    #[must_use]
    pub fn aborts_observed(&self) -> usize {
        *self.aborts.lock()
    }
}

#[async_trait]
impl StageBody for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        if !self.cooperative {
            tokio::time::sleep(self.delay).await;
            return Ok(input.clone());
        }

        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(input.clone()),
            () = ctx.abort_signal().aborted() => {
                *self.aborts.lock() += 1;
                Err(PipelineError::transient(&self.name, "aborted"))
            }
        }
    }
}
