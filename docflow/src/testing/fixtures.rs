//! In-memory wiring for engine tests.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::executor::{StageExecutor, StagePolicy};
use crate::pipeline::{PipelineCoordinator, StageRegistry};
use crate::queue::{InMemoryTaskQueue, TaskQueue, WorkerPool};
use crate::stages::StageBody;
use crate::store::{CheckpointStore, EventLog, InMemoryKeyValueStore, KeyValueStore};

/// Stores, queue and registry wired together in memory.
#[derive(Debug)]
pub struct TestEnv {
    /// The backing key-value store.
    pub kv: Arc<InMemoryKeyValueStore>,
    /// Checkpoint store over `kv`.
    pub checkpoints: CheckpointStore,
    /// Event log over `kv`.
    pub events: EventLog,
    /// The task queue.
    pub queue: Arc<InMemoryTaskQueue>,
    registry: StageRegistry,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Creates an empty environment with default retention windows.
    #[must_use]
    pub fn new() -> Self {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let shared: Arc<dyn KeyValueStore> = kv.clone();
        let config = StoreConfig::default();
        Self {
            kv,
            checkpoints: CheckpointStore::new(shared.clone(), &config),
            events: EventLog::new(shared, &config),
            queue: InMemoryTaskQueue::shared(),
            registry: StageRegistry::new(),
        }
    }

    /// Registers a stage body under `policy`.
    #[must_use]
    pub fn with_stage(mut self, body: Arc<dyn StageBody>, policy: StagePolicy) -> Self {
        let executor = StageExecutor::new(body, policy, self.checkpoints.clone(), self.events.clone());
        self.registry.register(executor);
        self
    }

    /// Builds a coordinator over the registered stages and the in-memory queue.
    #[must_use]
    pub fn coordinator(&self) -> Arc<PipelineCoordinator> {
        let queue: Arc<dyn TaskQueue> = self.queue.clone();
        Arc::new(PipelineCoordinator::new(
            self.registry.clone(),
            queue,
            self.checkpoints.clone(),
            self.events.clone(),
        ))
    }

    /// Builds a coordinator and a worker pool draining the in-memory queue into it.
    #[must_use]
    pub fn runtime(&self) -> (Arc<PipelineCoordinator>, WorkerPool) {
        let coordinator = self.coordinator();
        let pool = WorkerPool::new(self.queue.clone(), coordinator.clone());
        (coordinator, pool)
    }
}
