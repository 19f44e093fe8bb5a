// THEORY:
// The `ParallelPipeline` groups many independent requests at once, e.g. every
// image of a detection batch. A single grouping call stays sequential (its
// region growth is order dependent), so the parallelism lives one level up:
// a dispatcher hands requests round-robin to a fixed set of worker tasks, each
// owning its own `GroupingPipeline`, and every request carries a oneshot
// channel for its answer. Callers get results back in the order they asked,
// no matter which worker finished first.

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core_modules::encoding::EncodedOutput;
use crate::core_modules::error::GroupingError;
use crate::pipeline::{ConfigError, GroupingPipeline, GroupingRequest, PipelineConfig};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Grouping(#[from] GroupingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to send task to worker pool")]
    WorkerUnavailable,

    #[error("Worker dropped the task before replying")]
    WorkerDropped,
}

pub struct GroupingTask {
    pub request: GroupingRequest,
    pub result_sender: oneshot::Sender<Result<EncodedOutput, GroupingError>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<GroupingTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<u64>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and `config.worker_pool_size` workers on the
    /// current tokio runtime.
    pub fn new(config: PipelineConfig) -> Self {
        let pool_size = config.worker_pool_size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<GroupingTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..pool_size)
            .map(|_| mpsc::unbounded_channel::<GroupingTask>())
            .unzip();

        // Round-robin dispatcher. Dropping `task_sender` ends it, which in turn
        // closes every worker channel.
        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % pool_size;
            }
        });

        let mut workers = Vec::with_capacity(pool_size);
        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let mut pipeline = GroupingPipeline::new(config.clone());
            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let result = pipeline.group(&task.request);
                    let _ = task.result_sender.send(result);
                }
                debug!(worker_id, processed = pipeline.processed(), "worker stopped");
                pipeline.processed()
            });
            workers.push(worker);
        }

        info!(workers = pool_size, "grouping worker pool started");
        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub async fn process(&self, request: GroupingRequest) -> Result<EncodedOutput, PipelineError> {
        let (result_sender, result_receiver) = oneshot::channel();

        let task = GroupingTask {
            request,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| PipelineError::WorkerUnavailable)?;

        Ok(result_receiver
            .await
            .map_err(|_| PipelineError::WorkerDropped)??)
    }

    /// Closes the queue, waits for in-flight work, and returns how many
    /// requests were grouped successfully over the pool's lifetime.
    pub async fn shutdown(self) -> u64 {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        join_all(self.workers)
            .await
            .into_iter()
            .map(|processed| processed.unwrap_or(0))
            .sum()
    }
}

pub struct ParallelPipeline {
    config: PipelineConfig,
    worker_pool: WorkerPool,
}

impl ParallelPipeline {
    /// Must be called from within a tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let worker_pool = WorkerPool::new(config.clone());
        Ok(Self {
            config,
            worker_pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn process(&self, request: GroupingRequest) -> Result<EncodedOutput, PipelineError> {
        self.worker_pool.process(request).await
    }

    /// Groups every request concurrently. The i-th result belongs to the i-th
    /// request; a failing request does not affect the others.
    pub async fn process_batch(
        &self,
        requests: Vec<GroupingRequest>,
    ) -> Vec<Result<EncodedOutput, PipelineError>> {
        let batch_size = requests.len();
        let results = join_all(requests.into_iter().map(|request| self.process(request))).await;
        debug!(
            batch_size,
            failed = results.iter().filter(|r| r.is_err()).count(),
            "batch grouped"
        );
        results
    }

    pub async fn shutdown(self) -> u64 {
        let processed = self.worker_pool.shutdown().await;
        info!(processed, "grouping worker pool stopped");
        processed
    }
}
