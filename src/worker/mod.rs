//! Worker Pool: fixed-concurrency job dispatcher. Pops
//! jobs, routes by [`JobType`] to a registered [`JobHandler`], enforces a
//! per-type deadline, and records the outcome back onto the Job Queue.

mod errors;
pub mod handlers;

pub use errors::HandlerError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::queue::model::{Job, JobPayload, JobType};
use crate::queue::JobQueue;

/// What a handler wants done with the job it was given once `handle`
/// returns successfully.
pub enum HandlerOutcome {
    /// The job's work is done; move it to `completed`.
    Complete,
    /// Re-enqueue with an updated payload after `delay`, without touching
    /// the retry budget — the ordinary polling cadence of
    /// `monitor_instance`/`monitor_startup`, not a failure.
    Reschedule { payload: JobPayload, delay: Duration },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome, HandlerError>;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    concurrency: usize,
    job_timeout: Duration,
    idle_poll: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        handlers: HashMap<JobType, Arc<dyn JobHandler>>,
        concurrency: usize,
        job_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            handlers,
            concurrency,
            job_timeout,
            idle_poll: Duration::from_millis(500),
        }
    }

    /// Spawns `concurrency` independent worker tasks, each looping
    /// dequeue-dispatch-record until `shutdown` flips true. Returns the
    /// join handles so the caller can await them during the shutdown
    /// grace period.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|idx| {
                let pool = Arc::clone(&self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move { pool.worker_loop(idx, &mut shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, idx: usize, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let dequeued = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                result = self.queue.dequeue() => result,
            };
            match dequeued {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => tokio::time::sleep(self.idle_poll).await,
                Err(e) => {
                    tracing::error!(worker = idx, error = %e, "job queue dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&self, job: Job) {
        let job_type = job.job_type();
        let Some(handler) = self.handlers.get(&job_type) else {
            tracing::error!(job_id = %job.id, ?job_type, "no handler registered for job type");
            if let Err(e) = self.queue.fail_immediately(&job.id, "no handler registered for job type").await {
                tracing::error!(job_id = %job.id, error = %e, "failed to record unroutable job");
            }
            return;
        };

        let outcome = tokio::time::timeout(self.job_timeout, handler.handle(&job)).await;
        let record_result = match outcome {
            Ok(Ok(HandlerOutcome::Complete)) => self.queue.complete(&job.id).await,
            Ok(Ok(HandlerOutcome::Reschedule { payload, delay })) => {
                self.queue.reschedule(&job.id, payload, delay).await
            }
            Ok(Err(HandlerError::Recoverable(msg))) => {
                tracing::warn!(job_id = %job.id, ?job_type, error = %msg, "handler reported recoverable failure");
                self.queue.fail(&job.id, msg).await
            }
            Ok(Err(HandlerError::Permanent(msg))) => {
                tracing::warn!(job_id = %job.id, ?job_type, error = %msg, "handler reported permanent failure");
                self.queue.fail_immediately(&job.id, msg).await
            }
            Err(_elapsed) => {
                tracing::warn!(job_id = %job.id, ?job_type, "handler exceeded per-job deadline");
                self.queue.fail(&job.id, "handler exceeded per-job deadline").await
            }
        };
        if let Err(e) = record_result {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job outcome");
        }
    }
}
