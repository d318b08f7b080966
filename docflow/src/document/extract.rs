//! Text extraction.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::{ensure_running, EXTRACT};
use crate::core::{ExtractedText, StageResult};
use crate::errors::{PipelineError, Result};
use crate::stages::{StageBody, StageContext};

const SEGMENTS: usize = 10;

/// Reads a document from the local filesystem.
///
/// Non-UTF-8 bytes are replaced rather than rejected. A missing file is an
/// input error and is not retried.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractTextStage;

impl ExtractTextStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageBody for ExtractTextStage {
    fn name(&self) -> &str {
        EXTRACT
    }

    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult> {
        let doc = input.require_document(EXTRACT)?;
        ctx.report_progress(0, json!({"file_path": doc.path})).await?;

        let metadata = match tokio::fs::metadata(&doc.path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(PipelineError::invalid_input(EXTRACT, format!("not a file: {}", doc.path))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::invalid_input(EXTRACT, format!("file not found: {}", doc.path)));
            }
            Err(e) => return Err(PipelineError::transient(EXTRACT, e)),
        };
        let file_size = metadata.len();
        info!(job_id = %ctx.job_id(), file = %doc.path, file_size, "Extracting text");
        ctx.report_progress(25, json!({"file_path": doc.path, "file_size": file_size}))
            .await?;

        let bytes = tokio::fs::read(&doc.path)
            .await
            .map_err(|e| PipelineError::transient(EXTRACT, e))?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let char_count = text.chars().count();
        for i in 0..SEGMENTS {
            ensure_running(ctx)?;
            let percent = 25 + (i + 1) * 75 / SEGMENTS;
            ctx.report_progress(
                u8::try_from(percent.min(100)).unwrap_or(100),
                json!({
                    "file_path": doc.path,
                    "file_size": file_size,
                    "chars_processed": char_count * (i + 1) / SEGMENTS,
                    "processing": format!("segment {}/{SEGMENTS}", i + 1),
                }),
            )
            .await?;
        }

        Ok(StageResult::Extracted(ExtractedText {
            source: doc.path.clone(),
            text,
            char_count,
            file_size,
            extracted_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentRef;
    use crate::document::test_support::context;
    use crate::errors::ErrorKind;
    use crate::testing::TestEnv;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[tokio::test]
    async fn test_extracts_file_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Quarterly report: revenue up, costs flat.").unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(file.path().to_string_lossy()));
        let output = ExtractTextStage::new().run(&ctx, &input).await.unwrap();

        let extracted = output.require_text("chunk").unwrap();
        assert_eq!(extracted.text, "Quarterly report: revenue up, costs flat.");
        assert_eq!(extracted.char_count, 41);
        assert_eq!(extracted.file_size, 41);
        assert!(ctx.last_percent().unwrap() >= 25);
    }

    #[tokio::test]
    async fn test_multibyte_text_survives_decoding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = "é".repeat(15) + "日本語のテキスト";
        file.write_all(content.as_bytes()).unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(file.path().to_string_lossy()));
        let output = ExtractTextStage::new().run(&ctx, &input).await.unwrap();

        let extracted = output.require_text("chunk").unwrap();
        assert_eq!(extracted.text, content);
        assert_eq!(extracted.char_count, 23);
        assert!(!extracted.text.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(dir.path().join("gone.txt").to_string_lossy()));
        let err = ExtractTextStage::new().run(&ctx, &input).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("file not found"));
    }

    #[tokio::test]
    async fn test_directory_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(dir.path().to_string_lossy()));
        let err = ExtractTextStage::new().run(&ctx, &input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_progress_after_file_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[b'x'; 2048]).unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(file.path().to_string_lossy()));
        ExtractTextStage::new().run(&ctx, &input).await.unwrap();

        let snapshot = env.checkpoints.get_progress(ctx.job_id()).await.unwrap().unwrap();
        assert_eq!(snapshot.percent, 100);
        assert_eq!(snapshot.detail["file_size"], 2048);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let env = TestEnv::new();
        let ctx = context(&env, EXTRACT);

        let input = StageResult::Document(DocumentRef::new(file.path().to_string_lossy()));
        let output = ExtractTextStage::new().run(&ctx, &input).await.unwrap();
        assert_eq!(output.require_text("chunk").unwrap().char_count, 0);
    }
}
