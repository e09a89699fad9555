use crate::settlement::pipeline::{PipelineOutcome, SettlementPipeline};
use crate::settlement::queue::SettlementQueue;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name recorded on claimed jobs (host + pid by default).
    pub consumer: String,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer: format!("settlement-{}", std::process::id()),
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(300),
            max_concurrent_jobs: 4,
        }
    }
}

/// Long-lived settlement loop: claims jobs from the durable queue and runs
/// a pipeline per job, several in parallel across distinct worker accounts.
///
/// Shutdown is cooperative: jobs that have not broadcast are released back
/// to the queue; jobs past broadcast run to completion.
pub struct SettlementWorker {
    queue: Arc<SettlementQueue>,
    pipeline: Arc<SettlementPipeline>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl SettlementWorker {
    pub fn new(
        queue: Arc<SettlementQueue>,
        pipeline: Arc<SettlementPipeline>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            pipeline,
            config,
            shutdown,
        }
    }

    /// Start the worker loop in the background.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(consumer = %self.config.consumer, "settlement worker started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        // Guards against the visibility timeout redelivering a job this
        // process is still holding.
        let inflight: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let claimed = self
                .queue
                .claim(&self.config.consumer, self.config.visibility_timeout)
                .await;

            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.changed() => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "failed to claim settlement job");
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            if !inflight.lock().insert(job.id) {
                drop(permit);
                continue;
            }

            if job.is_redelivery() {
                info!(job_id = %job.id, attempts = job.attempts, "redelivered settlement job");
            }

            let queue = self.queue.clone();
            let pipeline = self.pipeline.clone();
            let shutdown = self.shutdown.clone();
            let inflight = inflight.clone();

            tokio::spawn(async move {
                let outcome = pipeline.run(&job, &shutdown).await;

                let ack = match &outcome {
                    PipelineOutcome::Finalized { .. } => queue.complete(job.id).await,
                    PipelineOutcome::Failed { .. } => queue.fail(job.id).await,
                    PipelineOutcome::Released => queue.release(job.id).await,
                    // Left running on purpose; redelivered after the
                    // visibility timeout and finalized idempotently.
                    PipelineOutcome::Stalled => Ok(()),
                };
                if let Err(e) = ack {
                    error!(job_id = %job.id, error = %e, "failed to acknowledge job outcome");
                }

                inflight.lock().remove(&job.id);
                drop(permit);
            });
        }

        // Wait for in-flight pipelines; anything past broadcast must record
        // its outcome before the process exits.
        let _ = semaphore
            .acquire_many(self.config.max_concurrent_jobs as u32)
            .await;
        info!(consumer = %self.config.consumer, "settlement worker stopped");
    }
}
