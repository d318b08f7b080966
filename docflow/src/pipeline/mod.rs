//! Pipeline sequencing.
//!
//! This module provides:
//! - The stage registry
//! - The coordinator that submits jobs and chains their stages

mod coordinator;
mod registry;


pub use coordinator::{Disposition, PipelineCoordinator};
pub use registry::StageRegistry;
