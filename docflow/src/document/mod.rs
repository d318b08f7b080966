//! The bundled document pipeline: extract, chunk, embed, persist.
//!
//! Each stage validates the [`StageResult`](crate::core::StageResult) variant
//! it expects before doing any work, checks the abort signal between items,
//! and reports progress through its [`StageContext`](crate::stages::StageContext).

mod chunk;
mod embed;
mod extract;
mod persist;

pub use chunk::{ChunkTextStage, DEFAULT_CHUNK_SIZE};
pub use embed::{EmbedChunksStage, Embedder, HashEmbedder};
pub use extract::ExtractTextStage;
pub use persist::{InMemoryVectorSink, PersistChunksStage, VectorRecord, VectorSink};

use crate::errors::{PipelineError, Result};
use crate::stages::StageContext;

/// Stage name of text extraction.
pub const EXTRACT: &str = "extract";
/// Stage name of chunking.
pub const CHUNK: &str = "chunk";
/// Stage name of embedding.
pub const EMBED: &str = "embed";
/// Stage name of persistence.
pub const PERSIST: &str = "persist";

/// The document pipeline, in execution order.
pub const DOCUMENT_STAGES: [&str; 4] = [EXTRACT, CHUNK, EMBED, PERSIST];

/// Progress after finishing `done` of `total` items, scaled into 10..=90.
pub(crate) fn scaled_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 90;
    }
    let scaled = done.saturating_mul(80) / total + 10;
    u8::try_from(scaled.min(90)).unwrap_or(90)
}

/// Fails the attempt once the soft deadline has fired.
pub(crate) fn ensure_running(ctx: &StageContext) -> Result<()> {
    if ctx.is_aborted() {
        let reason = ctx
            .abort_signal()
            .reason()
            .unwrap_or_else(|| "aborted".to_string());
        return Err(PipelineError::transient(ctx.stage_name(), reason));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_progress() {
        assert_eq!(scaled_progress(0, 10), 10);
        assert_eq!(scaled_progress(5, 10), 50);
        assert_eq!(scaled_progress(10, 10), 90);
        assert_eq!(scaled_progress(1500, 1000), 90);
        assert_eq!(scaled_progress(3, 0), 90);
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(DOCUMENT_STAGES, ["extract", "chunk", "embed", "persist"]);
    }
}
