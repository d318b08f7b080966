//! Testing utilities for docflow pipelines.
//!
//! This module provides:
//! - Scripted stage bodies (failing, slow, passthrough)
//! - A key-value store that can be taken offline
//! - Assertions over notifications and job state
//! - In-memory wiring of stores, queue and coordinator

mod assertions;
mod fixtures;
mod mocks;
mod store;

pub use assertions::{assert_event_count, assert_job_status, assert_tagged_count};
pub use fixtures::TestEnv;
pub use mocks::{PassthroughStage, ScriptedStage, SlowStage};
pub use store::UnavailableStore;
