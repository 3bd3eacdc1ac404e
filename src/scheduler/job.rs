use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::JobContext;

/// Failure signal returned by [`Job::exec`]. Opaque to the engine.
pub type JobError = anyhow::Error;

/// A unit of work admitted through [`Engine::enqueue`](crate::engine::Engine::enqueue).
///
/// Identity is informational only; the engine does not enforce unique ids.
#[async_trait]
pub trait Job: Send + Sync {
    fn job_id(&self) -> &str;

    fn job_type(&self) -> &str;

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run one attempt. Implementations should watch `ctx` for cancellation;
    /// the engine never interrupts a running attempt.
    async fn exec(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Identity facet of a job as seen by plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub job_type: String,
    pub tags: Vec<String>,
}

impl JobInfo {
    pub fn new(id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Capture the identity accessors of `job`.
    pub fn of(job: &dyn Job) -> Self {
        Self {
            id: job.job_id().to_string(),
            job_type: job.job_type().to_string(),
            tags: job.tags(),
        }
    }
}

impl std::fmt::Display for JobInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.job_type)
    }
}
