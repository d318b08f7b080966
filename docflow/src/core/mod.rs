//! Core domain model types for docflow.
//!
//! This module contains the records that flow through the engine:
//! - Job identity and job records
//! - Typed stage results
//! - Progress snapshots and notification events
//! - Status enums

mod event;
mod job;
mod progress;
mod result;
mod status;

pub use event::{EventScope, NotificationEvent};
pub use job::{Job, JobId};
pub use progress::{ProgressSnapshot, PIPELINE_COMPLETE, PIPELINE_FAILED, PIPELINE_START};
pub use result::{
    Chunk, ChunkSet, DocumentRef, EmbeddedChunk, EmbeddingSet, ExtractedText, ProcessingSummary,
    StageResult, StoredDocuments,
};
pub use status::{ExecutorState, JobStatus, Severity, TaskState};
