//! Stage execution with deadlines, retries and checkpoint resume.

mod policy;
mod runner;

pub use policy::{BackoffStrategy, JitterStrategy, StagePolicy};
pub use runner::{StageExecutor, StageOutcome};
