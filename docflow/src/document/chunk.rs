//! Fixed-size character chunking.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::{ensure_running, scaled_progress, CHUNK};
use crate::core::{Chunk, ChunkSet, StageResult};
use crate::errors::{PipelineError, Result};
use crate::stages::{StageBody, StageContext};

/// Default chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Splits extracted text into consecutive, non-overlapping chunks.
///
/// Offsets count characters, not bytes.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTextStage {
    chunk_size: usize,
}

impl Default for ChunkTextStage {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkTextStage {
    /// Creates the stage with 500-character chunks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk length. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns the chunk length.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Splits `text` without reporting progress.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(chunk_id, piece)| {
                let start_pos = chunk_id * self.chunk_size;
                Chunk {
                    chunk_id,
                    content: piece.iter().collect(),
                    start_pos,
                    end_pos: start_pos + piece.len(),
                    char_count: piece.len(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl StageBody for ChunkTextStage {
    fn name(&self) -> &str {
        CHUNK
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        let extracted = input.require_text(CHUNK)?;
        if extracted.text.is_empty() {
            return Err(PipelineError::invalid_input(CHUNK, "extracted text is empty"));
        }
        ctx.report_progress(0, json!({"source": extracted.source, "char_count": extracted.char_count}))
            .await?;

        let chunks = self.split(&extracted.text);
        let total_chars = extracted.text.chars().count();
        for chunk in &chunks {
            ensure_running(ctx)?;
            ctx.report_progress(
                scaled_progress(chunk.end_pos, total_chars),
                json!({
                    "processing": format!("chunk {}/{}", chunk.chunk_id + 1, chunks.len()),
                    "chunks_created": chunk.chunk_id + 1,
                }),
            )
            .await?;
        }

        info!(job_id = %ctx.job_id(), chunks = chunks.len(), chunk_size = self.chunk_size, "Text chunked");
        Ok(StageResult::Chunked(ChunkSet {
            source: extracted.source.clone(),
            char_count: extracted.char_count,
            chunks,
            chunked_at: Utc::now(),
        }))
    }
}
