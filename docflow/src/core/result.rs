//! Typed payloads passed between stages.
//!
//! Each stage boundary has an explicit schema. A stage validates the variant
//! it receives through one of the `require_*` accessors before doing any work,
//! and a mismatch is an [`PipelineError::InvalidInput`] rather than a retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// Reference to the document a job was submitted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Location of the document (a filesystem path for the bundled stages).
    pub path: String,
}

impl DocumentRef {
    /// Creates a new document reference.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the final path component, or the whole path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// Output of text extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Path of the source document.
    pub source: String,
    /// The extracted text.
    pub text: String,
    /// Number of characters in `text`.
    pub char_count: usize,
    /// Size of the source file in bytes.
    pub file_size: u64,
    /// When extraction finished.
    pub extracted_at: DateTime<Utc>,
}

/// A contiguous slice of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Zero-based chunk index.
    pub chunk_id: usize,
    /// The chunk text.
    pub content: String,
    /// Character offset of the first character.
    pub start_pos: usize,
    /// Character offset one past the last character.
    pub end_pos: usize,
    /// Number of characters in `content`.
    pub char_count: usize,
}

/// Output of chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSet {
    /// Path of the source document.
    pub source: String,
    /// Character count of the full text.
    pub char_count: usize,
    /// The chunks, in document order.
    pub chunks: Vec<Chunk>,
    /// When chunking finished.
    pub chunked_at: DateTime<Utc>,
}

/// A chunk with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// The embedded chunk.
    pub chunk: Chunk,
    /// The embedding vector.
    pub embedding: Vec<f32>,
}

/// Output of embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSet {
    /// Path of the source document.
    pub source: String,
    /// Character count of the full text.
    pub char_count: usize,
    /// Embedding model identifier.
    pub model: String,
    /// The embedded chunks, in document order.
    pub chunks: Vec<EmbeddedChunk>,
    /// When embedding finished.
    pub embedded_at: DateTime<Utc>,
}

/// Counts recorded when a document has been persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    /// Characters extracted.
    pub char_count: usize,
    /// Chunks produced.
    pub chunk_count: usize,
    /// Embeddings produced.
    pub embedding_count: usize,
    /// Records written to the vector sink.
    pub saved_count: usize,
}

/// Output of persistence, the terminal stage of the document pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocuments {
    /// Path of the source document.
    pub source: String,
    /// Identifiers assigned by the vector sink.
    pub document_ids: Vec<String>,
    /// Per-step counts.
    pub summary: ProcessingSummary,
    /// When persistence finished.
    pub stored_at: DateTime<Utc>,
}

/// The payload produced by one stage and consumed by the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    /// Initial input of a document job.
    Document(DocumentRef),
    /// Extracted text.
    Extracted(ExtractedText),
    /// Chunked text.
    Chunked(ChunkSet),
    /// Embedded chunks.
    Embedded(EmbeddingSet),
    /// Persisted document records.
    Stored(StoredDocuments),
}

impl StageResult {
    /// Returns the variant name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Extracted(_) => "extracted",
            Self::Chunked(_) => "chunked",
            Self::Embedded(_) => "embedded",
            Self::Stored(_) => "stored",
        }
    }

    /// Returns the number of items this result accounts for.
    ///
    /// Characters for extracted text, chunks for chunk and embedding sets,
    /// saved records for stored documents.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            Self::Document(_) => 1,
            Self::Extracted(e) => e.char_count,
            Self::Chunked(c) => c.chunks.len(),
            Self::Embedded(e) => e.chunks.len(),
            Self::Stored(s) => s.document_ids.len(),
        }
    }

    /// Requires a document reference.
    pub fn require_document(&self, stage: &str) -> Result<&DocumentRef> {
        match self {
            Self::Document(doc) if !doc.path.is_empty() => Ok(doc),
            Self::Document(_) => Err(PipelineError::invalid_input(stage, "document path is empty")),
            other => Err(mismatch(stage, "document", other)),
        }
    }

    /// Requires extracted text.
    pub fn require_text(&self, stage: &str) -> Result<&ExtractedText> {
        match self {
            Self::Extracted(text) => Ok(text),
            other => Err(mismatch(stage, "extracted", other)),
        }
    }

    /// Requires a non-empty chunk list.
    pub fn require_chunks(&self, stage: &str) -> Result<&ChunkSet> {
        match self {
            Self::Chunked(set) if !set.chunks.is_empty() => Ok(set),
            Self::Chunked(_) => Err(PipelineError::invalid_input(stage, "chunk list is empty")),
            other => Err(mismatch(stage, "chunked", other)),
        }
    }

    /// Requires a non-empty embedding list.
    pub fn require_embeddings(&self, stage: &str) -> Result<&EmbeddingSet> {
        match self {
            Self::Embedded(set) if !set.chunks.is_empty() => Ok(set),
            Self::Embedded(_) => Err(PipelineError::invalid_input(stage, "embedding list is empty")),
            other => Err(mismatch(stage, "embedded", other)),
        }
    }
}

fn mismatch(stage: &str, expected: &str, actual: &StageResult) -> PipelineError {
    PipelineError::invalid_input(
        stage,
        format!("expected {expected} input, got {}", actual.kind()),
    )
}
