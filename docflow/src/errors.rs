//! Error types for the docflow orchestration engine.
//!
//! Every failure a stage attempt can produce is a [`PipelineError`], and every
//! error maps onto an [`ErrorKind`]. The stage executor dispatches its retry
//! policy on the kind rather than on the concrete error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Which of the two per-attempt deadlines fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deadline {
    /// Cooperative deadline: the stage body is signalled to abort.
    Soft,
    /// Forced deadline: the stage body is terminated.
    Hard,
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soft => write!(f, "soft"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// Classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed stage input.
    InvalidInput,
    /// A soft or hard deadline was exceeded.
    Timeout,
    /// Any other failure raised by a stage body.
    Transient,
    /// The checkpoint/event store could not be reached.
    StorageUnavailable,
    /// A stage used up its attempt budget.
    RetriesExhausted,
    /// A requested record does not exist.
    NotFound,
    /// The pipeline definition is invalid.
    Validation,
    /// The task queue rejected an invocation.
    Queue,
    /// A stored payload could not be encoded or decoded.
    Serialization,
    /// Configuration could not be loaded.
    Config,
}

impl ErrorKind {
    /// Returns true if a stage attempt failing with this kind may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transient | Self::StorageUnavailable
        )
    }

    /// Returns the tag attached to notification events for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::StorageUnavailable => "storage_unavailable",
            Self::RetriesExhausted => "retries_exhausted",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Queue => "queue",
            Self::Serialization => "serialization",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The main error type for docflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage's required input fields are missing.
    #[error("Invalid input for stage '{stage}': {message}")]
    InvalidInput {
        /// The stage that rejected its input.
        stage: String,
        /// What was missing or malformed.
        message: String,
    },

    /// A stage attempt ran past one of its deadlines.
    #[error("Stage '{stage}' exceeded its {deadline} deadline of {limit_ms} ms")]
    Timeout {
        /// The stage that timed out.
        stage: String,
        /// Which deadline fired.
        deadline: Deadline,
        /// The configured limit in milliseconds.
        limit_ms: u64,
    },

    /// A stage body failed for any other reason.
    #[error("Stage '{stage}' failed: {message}")]
    Transient {
        /// The failing stage.
        stage: String,
        /// The failure message.
        message: String,
    },

    /// The key-value store backing checkpoints and events is unreachable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stage failed on every permitted attempt.
    #[error("Stage '{stage}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The failing stage.
        stage: String,
        /// Total attempts made (initial + retries).
        attempts: usize,
        /// Kind of the final attempt's error.
        last_kind: ErrorKind,
        /// Message of the final attempt's error.
        last_error: String,
    },

    /// A job, snapshot or record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The pipeline definition was rejected.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The task queue could not accept an invocation.
    #[error("Queue error: {0}")]
    Queue(String),

    /// A stored payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias used across the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a transient error from any displayable cause.
    #[must_use]
    pub fn transient(stage: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Transient {
            stage: stage.into(),
            message: cause.to_string(),
        }
    }

    /// Creates a storage-unavailable error.
    #[must_use]
    pub fn storage(cause: impl fmt::Display) -> Self {
        Self::StorageUnavailable(cause.to_string())
    }

    /// Attributes an unattributed transient error to `stage`.
    #[must_use]
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            Self::Transient { stage: s, message } if s.is_empty() => Self::Transient {
                stage: stage.to_string(),
                message,
            },
            other => other,
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Queue(_) => ErrorKind::Queue,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true if the executor may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Converts to a dictionary representation suitable for event details.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));

        match self {
            Self::Timeout { deadline, limit_ms, .. } => {
                map.insert("deadline".to_string(), serde_json::json!(deadline));
                map.insert("limit_ms".to_string(), serde_json::json!(limit_ms));
            }
            Self::RetriesExhausted { attempts, last_kind, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("last_kind".to_string(), serde_json::json!(last_kind));
            }
            _ => {}
        }

        map
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient {
            stage: String::new(),
            message: format!("{err:#}"),
        }
    }
}

/// Error raised when a pipeline definition is rejected at submission.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Rejects a pipeline with no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self::new("Pipeline must contain at least one stage")
    }

    /// Rejects stages that have no registered executor.
    #[must_use]
    pub fn unknown_stages(stages: Vec<String>) -> Self {
        Self::new(format!("Unknown stages: {}", stages.join(", "))).with_stages(stages)
    }
}
