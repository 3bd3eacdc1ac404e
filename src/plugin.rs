//! Observation and annotation hooks invoked around every job attempt.
//!
//! Plugins are registered once, before the engine starts, and called in
//! registration order. Within one phase each plugin receives the context
//! returned by the previous one, so later plugins can read annotations left
//! by earlier ones.
//!
//! Plugins are shared by every worker and may be called concurrently for
//! different jobs. Any cross-call state must be synchronized by the plugin.

use std::sync::Arc;

use crate::context::JobContext;
use crate::scheduler::job::{JobError, JobInfo};

pub trait Plugin: Send + Sync {
    /// Called before each attempt. The returned context is used for the attempt.
    fn on_job_start(&self, ctx: JobContext, _job: &JobInfo) -> JobContext {
        ctx
    }

    /// Called once after a successful attempt.
    fn on_job_end(&self, _ctx: &JobContext, _job: &JobInfo) {}

    /// Called after a failed attempt. The returned context seeds the next attempt.
    fn on_job_error(&self, ctx: JobContext, _job: &JobInfo, _error: &JobError) -> JobContext {
        ctx
    }
}

/// Fixed, ordered list of plugins.
#[derive(Clone)]
pub struct PluginChain {
    plugins: Arc<[Arc<dyn Plugin>]>,
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins: plugins.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn job_started(&self, ctx: JobContext, job: &JobInfo) -> JobContext {
        self.plugins
            .iter()
            .fold(ctx, |ctx, plugin| plugin.on_job_start(ctx, job))
    }

    pub fn job_ended(&self, ctx: &JobContext, job: &JobInfo) {
        for plugin in self.plugins.iter() {
            plugin.on_job_end(ctx, job);
        }
    }

    pub fn job_failed(&self, ctx: JobContext, job: &JobInfo, error: &JobError) -> JobContext {
        self.plugins
            .iter()
            .fold(ctx, |ctx, plugin| plugin.on_job_error(ctx, job, error))
    }
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginChain")
            .field("len", &self.plugins.len())
            .finish()
    }
}
