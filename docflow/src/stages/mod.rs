//! Stage body contract.
//!
//! A stage body is the business logic of one pipeline step. It receives the
//! previous stage's [`StageResult`] and produces its own; timeouts, retries
//! and checkpointing are the executor's job.

mod abort;
mod context;

pub use abort::AbortSignal;
pub use context::StageContext;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::StageResult;
use crate::errors::Result;

/// Trait for stage bodies.
///
/// Bodies are invoked at least once per job and must tolerate re-execution.
/// A body should validate its input through the `require_*` accessors of
/// [`StageResult`] before doing work, so that malformed input fails fast.
#[async_trait]
pub trait StageBody: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs one attempt of the stage.
    async fn run(&self, ctx: &StageContext, input: &StageResult) -> Result<StageResult>;
}
