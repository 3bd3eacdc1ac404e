use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::context::JobContext;
use crate::error::{EngineError, Result};
use crate::scheduler::job::Job;

const DEFAULT_MAX_JOBS: usize = 100;

/// An admitted job together with the context supplied at enqueue time.
pub struct QueuedJob {
    pub ctx: JobContext,
    pub job: Arc<dyn Job>,
    pub enqueued_at: Instant,
}

impl QueuedJob {
    pub fn new(ctx: JobContext, job: Arc<dyn Job>) -> Self {
        Self {
            ctx,
            job,
            enqueued_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("job_id", &self.job.job_id())
            .field("job_type", &self.job.job_type())
            .field("ctx", &self.ctx)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueuedJob>,
    closed: bool,
    /// Consumers currently parked in `pop`.
    waiting: usize,
}

/// Bounded FIFO of admitted jobs shared by the engine and its workers.
///
/// Pushing never blocks; popping waits until an entry arrives or the queue
/// is closed and drained.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    /// A capacity of zero only admits a job while a consumer is waiting for it.
    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_jobs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job without waiting. Fails if the queue is closed or at capacity.
    pub fn try_push(&self, entry: QueuedJob) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(EngineError::QueueClosed);
        }
        let limit = if self.max_jobs == 0 {
            state.waiting
        } else {
            self.max_jobs
        };
        if state.entries.len() >= limit {
            return Err(EngineError::QueueFull);
        }
        state.entries.push_back(entry);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Take the oldest job, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and every entry has been taken.
    /// Dropping the returned future before it completes loses no entry.
    pub async fn pop(&self) -> Option<QueuedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let _waiting = {
                let mut state = self.lock();
                if let Some(entry) = state.entries.pop_front() {
                    let more = !state.entries.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(entry);
                }
                if state.closed {
                    return None;
                }
                state.waiting += 1;
                WaitingGuard { queue: self }
            };

            notified.await;
        }
    }

    /// Refuse further pushes and wake every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.max_jobs
    }

    /// Returns the current number of waiting jobs
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns true if a push would currently be rejected for lack of room
    pub fn is_full(&self) -> bool {
        let state = self.lock();
        let limit = if self.max_jobs == 0 {
            state.waiting
        } else {
            self.max_jobs
        };
        state.entries.len() >= limit
    }

    /// Number of consumers currently parked in [`JobQueue::pop`].
    pub fn waiting_consumers(&self) -> usize {
        self.lock().waiting
    }
}

struct WaitingGuard<'a> {
    queue: &'a JobQueue,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}
