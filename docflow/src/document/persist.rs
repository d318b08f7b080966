//! Writing embedded chunks to a vector sink.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

use super::{ensure_running, scaled_progress, PERSIST};
use crate::core::{JobId, ProcessingSummary, StageResult, StoredDocuments};
use crate::errors::{PipelineError, Result};
use crate::stages::{StageBody, StageContext};

/// One stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Record id, `doc_{chunk_id}_{job prefix}`.
    pub id: String,
    /// Path of the source document.
    pub source: String,
    /// Index of the chunk within the document.
    pub chunk_id: usize,
    /// Chunk text.
    pub content: String,
    /// Hex-encoded SHA-256 of `content`.
    pub content_hash: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Embedding model identifier.
    pub model: String,
}

impl VectorRecord {
    /// Derives the record id of `chunk_id` within `job_id`.
    #[must_use]
    pub fn record_id(job_id: &JobId, chunk_id: usize) -> String {
        format!("doc_{chunk_id}_{}", job_id.short(8))
    }

    /// Hex-encoded SHA-256 digest of `content`.
    #[must_use]
    pub fn content_hash(content: &str) -> String {
        hex::encode(Sha256::digest(content.as_bytes()))
    }
}

/// Destination of embedded chunks. Writes must be idempotent per record id.
#[async_trait]
pub trait VectorSink: Send + Sync + Debug {
    /// Inserts or replaces `record`.
    async fn upsert(&self, record: VectorRecord) -> anyhow::Result<()>;
}

/// A vector sink held in memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorSink {
    records: DashMap<String, VectorRecord>,
}

impl InMemoryVectorSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns a copy of the record stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl VectorSink for InMemoryVectorSink {
    async fn upsert(&self, record: VectorRecord) -> anyhow::Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }
}

/// Stores every embedded chunk through an injected [`VectorSink`].
#[derive(Debug, Clone)]
pub struct PersistChunksStage {
    sink: Arc<dyn VectorSink>,
}

impl PersistChunksStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(sink: Arc<dyn VectorSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StageBody for PersistChunksStage {
    fn name(&self) -> &str {
        PERSIST
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        let set = input.require_embeddings(PERSIST)?;
        let total = set.chunks.len();
        ctx.report_progress(0, json!({"source": set.source, "total_chunks": total}))
            .await?;

        let mut document_ids = Vec::with_capacity(total);
        for (i, embedded) in set.chunks.iter().enumerate() {
            ensure_running(ctx)?;
            let id = VectorRecord::record_id(ctx.job_id(), embedded.chunk.chunk_id);
            self.sink
                .upsert(VectorRecord {
                    id: id.clone(),
                    source: set.source.clone(),
                    chunk_id: embedded.chunk.chunk_id,
                    content: embedded.chunk.content.clone(),
                    content_hash: VectorRecord::content_hash(&embedded.chunk.content),
                    embedding: embedded.embedding.clone(),
                    model: set.model.clone(),
                })
                .await
                .map_err(|e| PipelineError::from(e).in_stage(PERSIST))?;
            document_ids.push(id);

            ctx.report_progress(
                scaled_progress(i + 1, total),
                json!({
                    "processing": format!("save {}/{total}", i + 1),
                    "saved_count": document_ids.len(),
                }),
            )
            .await?;
        }

        let summary = ProcessingSummary {
            char_count: set.char_count,
            chunk_count: total,
            embedding_count: total,
            saved_count: document_ids.len(),
        };
        info!(job_id = %ctx.job_id(), saved = summary.saved_count, source = %set.source, "Chunks persisted");
        Ok(StageResult::Stored(StoredDocuments {
            source: set.source.clone(),
            document_ids,
            summary,
            stored_at: Utc::now(),
        }))
    }
}
