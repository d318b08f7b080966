//! Chunk embedding.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{info, warn};

use super::{ensure_running, scaled_progress, EMBED};
use crate::core::{EmbeddedChunk, EmbeddingSet, StageResult};
use crate::errors::{PipelineError, Result};
use crate::stages::{StageBody, StageContext};

/// A warning notification is appended after every this many chunks.
const WARN_EVERY: usize = 10;

/// Turns text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync + Debug {
    /// Identifier of the model, recorded in the embedding set.
    fn model(&self) -> &str;

    /// Embeds one piece of text.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Deterministic embedder derived from SHA-256 digests.
///
/// Equal texts always map to equal unit vectors. Useful offline and in tests;
/// it carries no semantic similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    model: String,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl HashEmbedder {
    /// Creates an embedder producing `dimensions`-long vectors.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("sha256-{dimensions}"),
        }
    }

    /// Returns the vector length.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimensions);
        let mut block: u32 = 0;
        while values.len() < self.dimensions {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            values.extend(
                digest
                    .iter()
                    .take(self.dimensions - values.len())
                    .map(|b| f32::from(*b) / 127.5 - 1.0),
            );
            block = block.wrapping_add(1);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}

/// Embeds every chunk with an injected [`Embedder`].
#[derive(Debug, Clone)]
pub struct EmbedChunksStage {
    embedder: Arc<dyn Embedder>,
}

impl Default for EmbedChunksStage {
    fn default() -> Self {
        Self::new(Arc::new(HashEmbedder::default()))
    }
}

impl EmbedChunksStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl StageBody for EmbedChunksStage {
    fn name(&self) -> &str {
        EMBED
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        let set = input.require_chunks(EMBED)?;
        let total = set.chunks.len();
        ctx.report_progress(0, json!({"source": set.source, "total_chunks": total}))
            .await?;

        let mut embedded = Vec::with_capacity(total);
        for (i, chunk) in set.chunks.iter().enumerate() {
            ensure_running(ctx)?;
            let embedding = self
                .embedder
                .embed(&chunk.content)
                .await
                .map_err(|e| PipelineError::from(e).in_stage(EMBED))?;
            embedded.push(EmbeddedChunk {
                chunk: chunk.clone(),
                embedding,
            });

            ctx.report_progress(
                scaled_progress(i + 1, total),
                json!({
                    "processing": format!("embedding {}/{total}", i + 1),
                    "embeddings_created": embedded.len(),
                }),
            )
            .await?;

            if i > 0 && i % WARN_EVERY == 0 {
                warn!(job_id = %ctx.job_id(), done = i, total, "Embedding still in progress");
                ctx.warn(
                    format!("Embedding in progress: {i}/{total}"),
                    json!({"embedded": i, "total": total}),
                )
                .await?;
            }
        }

        info!(job_id = %ctx.job_id(), embeddings = embedded.len(), model = %self.embedder.model(), "Chunks embedded");
        Ok(StageResult::Embedded(EmbeddingSet {
            source: set.source.clone(),
            char_count: set.char_count,
            model: self.embedder.model().to_string(),
            chunks: embedded,
            embedded_at: Utc::now(),
        }))
    }
}
