//! Background workers that drain the engine's job queue.
//!
//! A worker is spawned by [`Engine::enqueue`](crate::engine::Engine::enqueue)
//! when a capacity slot is free and owns that slot until it exits.
//!
//! # Components
//!
//! - [`JobExecutor`]: retry loop and plugin hook invocation for one job
//! - [`Worker`]: the dequeue loop running in its own task
//!
//! # Worker Loop
//!
//! 1. Wait for a queued job or for the inactivity timeout, whichever is first
//! 2. Run the job through [`JobExecutor::execute`]
//! 3. Go back to waiting
//!
//! The loop ends on inactivity, when the queue is closed and drained, or
//! after a job panics. The capacity slot is released on every exit path.

pub mod executor;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;

pub use executor::{ExecutionOutcome, JobExecutor};

use crate::scheduler::{JobQueue, QueuedJob};
use executor::panic_message;

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Idle,
    QueueClosed,
    /// `job_id` is `None` when the job's own identity accessor panicked.
    Fatal {
        job_id: Option<String>,
        message: String,
    },
}

pub struct Worker {
    id: u64,
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    inactivity_timeout: Duration,
    slot: OwnedSemaphorePermit,
}

impl Worker {
    pub fn new(
        id: u64,
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        inactivity_timeout: Duration,
        slot: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            id,
            queue,
            executor,
            inactivity_timeout,
            slot,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run until idle, closed, or a crash-class fault. Consumes the worker so
    /// its capacity slot is returned when this future completes or is dropped.
    pub async fn run(self) -> WorkerExit {
        let Self {
            id,
            queue,
            executor,
            inactivity_timeout,
            slot: _slot,
        } = self;

        tracing::debug!(worker_id = id, "Worker started");

        let exit = loop {
            let entry = match tokio::time::timeout(inactivity_timeout, queue.pop()).await {
                Err(_) => break WorkerExit::Idle,
                Ok(None) => break WorkerExit::QueueClosed,
                Ok(Some(entry)) => entry,
            };

            // Job identity accessors are caller code too, so the whole
            // per-job step sits inside the crash boundary.
            match AssertUnwindSafe(process(id, &executor, entry))
                .catch_unwind()
                .await
            {
                Ok(None) => {}
                Ok(Some(exit)) => break exit,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        worker_id = id,
                        error = %message,
                        "Worker panicked outside a job attempt, stopping worker"
                    );
                    break WorkerExit::Fatal {
                        job_id: None,
                        message,
                    };
                }
            }
        };

        tracing::debug!(worker_id = id, reason = ?exit, "Worker exiting");
        exit
    }
}

/// Run one dequeued job. Returns the exit reason if the worker must stop.
async fn process(id: u64, executor: &JobExecutor, entry: QueuedJob) -> Option<WorkerExit> {
    tracing::debug!(
        worker_id = id,
        job_id = entry.job.job_id(),
        queued_ms = entry.enqueued_at.elapsed().as_millis() as u64,
        "Dequeued job"
    );

    match executor.execute(entry.ctx, entry.job.as_ref()).await {
        ExecutionOutcome::Fatal { attempt, message } => {
            tracing::error!(
                worker_id = id,
                job_id = entry.job.job_id(),
                job_type = entry.job.job_type(),
                attempt,
                error = %message,
                "Job panicked, stopping worker"
            );
            Some(WorkerExit::Fatal {
                job_id: Some(entry.job.job_id().to_string()),
                message,
            })
        }
        _ => None,
    }
}
