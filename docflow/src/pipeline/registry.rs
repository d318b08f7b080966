//! Stage registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::PipelineValidationError;
use crate::executor::StageExecutor;

/// Executors addressable by stage name.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    executors: HashMap<String, Arc<StageExecutor>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its stage name, replacing any previous one.
    pub fn register(&mut self, executor: StageExecutor) -> &mut Self {
        self.executors
            .insert(executor.name().to_string(), Arc::new(executor));
        self
    }

    /// Registers an executor, builder style.
    #[must_use]
    pub fn with(mut self, executor: StageExecutor) -> Self {
        self.register(executor);
        self
    }

    /// Looks up the executor of `stage`.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<Arc<StageExecutor>> {
        self.executors.get(stage).cloned()
    }

    /// Returns true if `stage` is registered.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.executors.contains_key(stage)
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Checks that `stages` is non-empty and fully registered.
    pub fn validate(&self, stages: &[String]) -> Result<(), PipelineValidationError> {
        if stages.is_empty() {
            return Err(PipelineValidationError::empty());
        }

        let unknown: Vec<String> = stages
            .iter()
            .filter(|s| !self.contains(s))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineValidationError::unknown_stages(unknown));
        }
        Ok(())
    }
}
