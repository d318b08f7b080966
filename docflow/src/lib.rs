//! # Docflow
//!
//! Checkpointed, retryable multi-stage document processing.
//!
//! A job is an ordered list of stages executed by workers pulling from a task
//! queue. Docflow provides:
//!
//! - **Stage execution**: soft and hard deadlines, bounded retries with backoff
//! - **Checkpoints**: a completed stage is never run twice for the same job
//! - **Progress and notifications**: a live snapshot plus an append-only event log
//! - **Status queries**: a read-only view merging queue, progress and events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docflow::prelude::*;
//!
//! let queue = InMemoryTaskQueue::shared();
//! let service = DocumentPipelineService::new(
//!     &PipelineConfig::default(),
//!     Arc::new(InMemoryKeyValueStore::new()),
//!     queue.clone(),
//!     Arc::new(HashEmbedder::default()),
//!     Arc::new(InMemoryVectorSink::new()),
//! )?;
//! let workers = WorkerPool::new(queue, service.coordinator());
//! workers.spawn(4);
//!
//! let job = service.submit_pipeline("uploads/report.txt").await?;
//! let status = service.get_status(&job).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod document;
pub mod errors;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod service;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{PipelineConfig, QueryConfig, StagePolicyConfig, StoreConfig, WorkerConfig};
    pub use crate::core::{
        DocumentRef, Job, JobId, JobStatus, NotificationEvent, ProgressSnapshot, Severity,
        StageResult, TaskState,
    };
    pub use crate::document::{
        ChunkTextStage, EmbedChunksStage, Embedder, ExtractTextStage, HashEmbedder,
        InMemoryVectorSink, PersistChunksStage, VectorSink,
    };
    pub use crate::errors::{ErrorKind, PipelineError, PipelineValidationError, Result};
    pub use crate::executor::{BackoffStrategy, JitterStrategy, StageExecutor, StageOutcome, StagePolicy};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Disposition, PipelineCoordinator, StageRegistry};
    pub use crate::query::{JobStatusView, StatusQuery};
    pub use crate::queue::{InMemoryTaskQueue, StageInvocation, TaskHandle, TaskQueue, WorkerPool};
    pub use crate::service::DocumentPipelineService;
    pub use crate::stages::{AbortSignal, StageBody, StageContext};
    pub use crate::store::{CheckpointStore, EventLog, InMemoryKeyValueStore, KeyValueStore};
}
