use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::context::JobContext;
use crate::plugin::PluginChain;
use crate::scheduler::job::{Job, JobInfo};

/// How a dequeued job left the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// An attempt succeeded; no further attempts were made.
    Succeeded { attempts: usize },
    /// Every attempt failed.
    Exhausted { attempts: usize },
    /// An attempt panicked. Remaining attempts are abandoned and no end or
    /// error hook runs for it. `attempt` is 0 when the job's identity
    /// accessors panicked before the first attempt could start.
    Fatal { attempt: usize, message: String },
}

impl ExecutionOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionOutcome::Fatal { .. })
    }
}

enum AttemptResult {
    Succeeded,
    Failed(JobContext),
}

/// Runs a job through its attempts, invoking the plugin chain around each one.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    plugins: PluginChain,
    max_attempts: usize,
}

impl JobExecutor {
    pub fn new(plugins: PluginChain, max_attempts: usize) -> Self {
        Self {
            plugins,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Execute `job` starting from the context captured at enqueue time.
    ///
    /// The context returned by the error hooks of one attempt is the input to
    /// the start hooks of the next.
    pub async fn execute(&self, ctx: JobContext, job: &dyn Job) -> ExecutionOutcome {
        let info = match std::panic::catch_unwind(AssertUnwindSafe(|| JobInfo::of(job))) {
            Ok(info) => info,
            Err(payload) => {
                return ExecutionOutcome::Fatal {
                    attempt: 0,
                    message: panic_message(payload.as_ref()),
                };
            }
        };
        let mut ctx = ctx;

        for attempt in 1..=self.max_attempts {
            tracing::debug!(job_id = %info.id, job_type = %info.job_type, attempt, "Executing job");

            let result = AssertUnwindSafe(self.attempt(ctx, job, &info))
                .catch_unwind()
                .await;

            match result {
                Ok(AttemptResult::Succeeded) => {
                    tracing::debug!(job_id = %info.id, attempt, "Job completed");
                    return ExecutionOutcome::Succeeded { attempts: attempt };
                }
                Ok(AttemptResult::Failed(next)) => ctx = next,
                Err(payload) => {
                    return ExecutionOutcome::Fatal {
                        attempt,
                        message: panic_message(payload.as_ref()),
                    };
                }
            }
        }

        tracing::warn!(
            job_id = %info.id,
            job_type = %info.job_type,
            attempts = self.max_attempts,
            "Job failed on every attempt, dropping"
        );
        ExecutionOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }

    async fn attempt(&self, ctx: JobContext, job: &dyn Job, info: &JobInfo) -> AttemptResult {
        let ctx = self.plugins.job_started(ctx, info);

        match job.exec(&ctx).await {
            Ok(()) => {
                self.plugins.job_ended(&ctx, info);
                AttemptResult::Succeeded
            }
            Err(e) => {
                tracing::debug!(job_id = %info.id, error = %e, "Job attempt failed");
                AttemptResult::Failed(self.plugins.job_failed(ctx, info, &e))
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
