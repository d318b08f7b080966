//! Workers that drain an [`InMemoryTaskQueue`] into the coordinator.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{InMemoryTaskQueue, QueuedTask};
use crate::pipeline::{Disposition, PipelineCoordinator};

/// A pool of workers pulling stage invocations from a queue.
///
/// Each worker runs one invocation to completion before taking the next.
pub struct WorkerPool {
    queue: Arc<InMemoryTaskQueue>,
    coordinator: Arc<PipelineCoordinator>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pending", &self.queue.pending())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool with no running workers.
    #[must_use]
    pub fn new(queue: Arc<InMemoryTaskQueue>, coordinator: Arc<PipelineCoordinator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            coordinator,
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Processes tasks on the current task until the queue is empty.
    ///
    /// Stages enqueued while draining are processed too, so a job runs to its
    /// terminal state. Returns the number of invocations processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while let Some(task) = self.queue.try_next().await {
            process(&self.queue, &self.coordinator, task).await;
            processed += 1;
        }
        processed
    }

    /// Starts `count` background workers.
    pub fn spawn(&self, count: usize) {
        let mut workers = self.workers.lock();
        for id in 0..count {
            let queue = Arc::clone(&self.queue);
            let coordinator = Arc::clone(&self.coordinator);
            let mut shutdown = self.shutdown.subscribe();

            workers.push(tokio::spawn(async move {
                info!(worker = id, "Worker started");
                loop {
                    let task = tokio::select! {
                        task = queue.next() => task,
                        _ = shutdown.changed() => None,
                    };
                    let Some(task) = task else { break };
                    process(&queue, &coordinator, task).await;
                }
                info!(worker = id, "Worker stopped");
            }));
        }
    }

    /// Signals every worker to stop and waits for them.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
    }
}

async fn process(queue: &InMemoryTaskQueue, coordinator: &PipelineCoordinator, task: QueuedTask) {
    let QueuedTask { handle, invocation, .. } = task;
    queue.mark_started(&handle);

    let job_id = invocation.job_id.clone();
    let stage = invocation.stage.clone();

    match coordinator.handle(invocation).await {
        Ok(Disposition::Failed { error, .. }) => queue.mark_finished(&handle, Err(error)),
        Ok(_) => queue.mark_finished(&handle, Ok(())),
        Err(e) => {
            error!(job_id = %job_id, stage = %stage, error = %e, "Invocation could not be handled");
            queue.mark_finished(&handle, Err(e.to_string()));
        }
    }
}
