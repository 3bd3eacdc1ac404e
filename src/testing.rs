//! Test doubles for code that depends on this crate.
//!
//! Enabled with the `test-util` feature. [`FakeJob`] plays a job with a
//! scripted sequence of results and [`FakeEngine`] records what a caller
//! enqueues without running anything.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::context::JobContext;
use crate::engine::JobEngine;
use crate::error::{EngineError, Result};
use crate::scheduler::{Job, JobError};

/// A job whose `exec` results are scripted up front.
///
/// Once the script runs out every further attempt succeeds.
#[derive(Debug)]
pub struct FakeJob {
    id: String,
    job_type: String,
    tags: Vec<String>,
    script: Mutex<VecDeque<Option<String>>>,
    calls: AtomicUsize,
}

impl FakeJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_type: "fake".to_string(),
            tags: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Queue a failing attempt with the given error message.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Some(message.into()));
        self
    }

    /// Queue a successful attempt.
    pub fn then_succeed(self) -> Self {
        self.push(None);
        self
    }

    /// Number of times `exec` was called.
    pub fn exec_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, step: Option<String>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }
}

#[async_trait]
impl Job for FakeJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    async fn exec(&self, _ctx: &JobContext) -> std::result::Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .flatten();
        match step {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(()),
        }
    }
}

/// A [`JobEngine`] that records calls instead of running jobs.
#[derive(Default)]
pub struct FakeEngine {
    starts: AtomicUsize,
    stops: AtomicUsize,
    reject: AtomicBool,
    enqueued: Mutex<Vec<(JobContext, Arc<dyn Job>)>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `enqueue` calls fail with [`EngineError::QueueFull`].
    pub fn reject_enqueues(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Ids of the accepted jobs, in enqueue order.
    pub fn enqueued_ids(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|(_, job)| job.job_id().to_string())
            .collect()
    }

    /// Drain the accepted jobs with the contexts they were enqueued with.
    pub fn take_enqueued(&self) -> Vec<(JobContext, Arc<dyn Job>)> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(JobContext, Arc<dyn Job>)>> {
        self.enqueued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobEngine for FakeEngine {
    fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&self, ctx: JobContext, job: Arc<dyn Job>) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(EngineError::QueueFull);
        }
        self.lock().push((ctx, job));
        Ok(())
    }
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine")
            .field("starts", &self.start_calls())
            .field("stops", &self.stop_calls())
            .field("enqueued", &self.lock().len())
            .finish()
    }
}
