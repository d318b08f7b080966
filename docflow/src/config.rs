//! Configuration for stores, workers and per-stage policies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::{PipelineError, Result};
use crate::executor::{BackoffStrategy, JitterStrategy, StagePolicy};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retention windows of the key-value store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Read-path settings.
    #[serde(default)]
    pub query: QueryConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Per-stage policy overrides keyed by stage name.
    #[serde(default)]
    pub stages: HashMap<String, StagePolicyConfig>,
}

/// Longest accepted retention window: one year.
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 3600;

/// Retention windows, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Lifetime of the live progress snapshot.
    #[serde(default = "default_progress_ttl")]
    pub progress_ttl_seconds: u64,
    /// Lifetime of stage checkpoints and job records.
    #[serde(default = "default_checkpoint_ttl")]
    pub checkpoint_ttl_seconds: u64,
    /// Lifetime of the notification list, refreshed on every append.
    #[serde(default = "default_notification_ttl")]
    pub notification_ttl_seconds: u64,
}

fn default_progress_ttl() -> u64 {
    3600
}

fn default_checkpoint_ttl() -> u64 {
    7200
}

fn default_notification_ttl() -> u64 {
    86400
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            progress_ttl_seconds: default_progress_ttl(),
            checkpoint_ttl_seconds: default_checkpoint_ttl(),
            notification_ttl_seconds: default_notification_ttl(),
        }
    }
}

impl StoreConfig {
    /// Progress TTL as a `Duration`.
    #[must_use]
    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_seconds)
    }

    /// Checkpoint TTL as a `Duration`.
    #[must_use]
    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_seconds)
    }

    /// Notification TTL as a `Duration`.
    #[must_use]
    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_seconds)
    }
}

/// Read-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Number of recent notifications included in a status view.
    #[serde(default = "default_recent_notifications")]
    pub recent_notifications: usize,
}

fn default_recent_notifications() -> usize {
    5
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            recent_notifications: default_recent_notifications(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

fn default_worker_count() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

/// Partial override of a stage's policy. Unset fields keep the stage default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePolicyConfig {
    /// Soft deadline in seconds.
    #[serde(default)]
    pub soft_timeout_seconds: Option<f64>,
    /// Hard deadline in seconds.
    #[serde(default)]
    pub hard_timeout_seconds: Option<f64>,
    /// Retries after the initial attempt.
    #[serde(default)]
    pub max_retries: Option<usize>,
    /// Base delay between attempts in seconds.
    #[serde(default)]
    pub retry_delay_seconds: Option<f64>,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: Option<BackoffStrategy>,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: Option<JitterStrategy>,
}

impl StagePolicyConfig {
    /// Applies the override on top of `base`.
    ///
    /// Fails if a duration is negative, NaN or too large, or if the resolved
    /// soft deadline is not below the hard deadline.
    pub fn apply(&self, base: StagePolicy) -> Result<StagePolicy> {
        let mut policy = base;
        if let Some(s) = self.soft_timeout_seconds {
            policy.soft_timeout = seconds("soft_timeout_seconds", s)?;
        }
        if let Some(s) = self.hard_timeout_seconds {
            policy.hard_timeout = seconds("hard_timeout_seconds", s)?;
        }
        if let Some(n) = self.max_retries {
            policy.max_retries = n;
        }
        if let Some(s) = self.retry_delay_seconds {
            policy.retry_delay = seconds("retry_delay_seconds", s)?;
        }
        if let Some(b) = self.backoff {
            policy.backoff = b;
        }
        if let Some(j) = self.jitter {
            policy.jitter = j;
        }

        if policy.soft_timeout.is_zero() || policy.soft_timeout >= policy.hard_timeout {
            return Err(PipelineError::Config(format!(
                "soft timeout ({:?}) must be positive and below hard timeout ({:?})",
                policy.soft_timeout, policy.hard_timeout
            )));
        }
        Ok(policy)
    }

    fn check_values(&self) -> Result<()> {
        for (field, value) in [
            ("soft_timeout_seconds", self.soft_timeout_seconds),
            ("hard_timeout_seconds", self.hard_timeout_seconds),
            ("retry_delay_seconds", self.retry_delay_seconds),
        ] {
            if let Some(v) = value {
                seconds(field, v)?;
            }
        }
        if let (Some(soft), Some(hard)) = (self.soft_timeout_seconds, self.hard_timeout_seconds) {
            if soft >= hard {
                return Err(PipelineError::Config(format!(
                    "soft timeout ({soft}s) must be below hard timeout ({hard}s)"
                )));
            }
        }
        Ok(())
    }
}

fn in_stage(stage: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Config(msg) => PipelineError::Config(format!("stage '{stage}': {msg}")),
        other => other,
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| PipelineError::Config(format!("{field}={value}: {e}")))
}

impl PipelineConfig {
    /// Creates a configuration with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Applies `DOCFLOW_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, for testing without touching the process env.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|e| PipelineError::Config(format!("{key}={raw}: {e}")))
                })
                .transpose()
        };

        if let Some(v) = parse("DOCFLOW_PROGRESS_TTL")? {
            self.store.progress_ttl_seconds = v;
        }
        if let Some(v) = parse("DOCFLOW_CHECKPOINT_TTL")? {
            self.store.checkpoint_ttl_seconds = v;
        }
        if let Some(v) = parse("DOCFLOW_NOTIFICATION_TTL")? {
            self.store.notification_ttl_seconds = v;
        }
        if let Some(v) = parse("DOCFLOW_WORKERS")? {
            self.workers.count = usize::try_from(v)
                .map_err(|e| PipelineError::Config(format!("DOCFLOW_WORKERS={v}: {e}")))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Resolves the policy for `stage`, starting from its default.
    pub fn policy_for(&self, stage: &str, default: StagePolicy) -> Result<StagePolicy> {
        match self.stages.get(stage) {
            Some(overrides) => overrides.apply(default).map_err(|e| in_stage(stage, e)),
            None => Ok(default),
        }
    }

    /// Rejects inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        for ttl in [
            self.store.progress_ttl_seconds,
            self.store.checkpoint_ttl_seconds,
            self.store.notification_ttl_seconds,
        ] {
            if ttl == 0 || ttl > MAX_TTL_SECONDS {
                return Err(PipelineError::Config(format!(
                    "TTL of {ttl}s is outside 1..={MAX_TTL_SECONDS}"
                )));
            }
        }
        if self.workers.count == 0 {
            return Err(PipelineError::Config("worker count must be positive".to_string()));
        }
        for (name, stage) in &self.stages {
            stage.check_values().map_err(|e| in_stage(name, e))?;
        }
        Ok(())
    }
}
