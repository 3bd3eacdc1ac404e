use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::EngineConfig;
use crate::context::JobContext;
use crate::error::{EngineError, Result};
use crate::plugin::{Plugin, PluginChain};
use crate::scheduler::{Job, JobQueue, QueuedJob};
use crate::worker::{JobExecutor, Worker};

/// Lifecycle surface of a job engine, for callers that want to swap in a fake.
#[async_trait]
pub trait JobEngine: Send + Sync {
    fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn enqueue(&self, ctx: JobContext, job: Arc<dyn Job>) -> Result<()>;
}

/// Resources that only exist between `start` and `stop`.
struct EngineRuntime {
    queue: Arc<JobQueue>,
    slots: Arc<Semaphore>,
    workers: TaskTracker,
    executor: Arc<JobExecutor>,
    handle: Handle,
}

enum EngineState {
    Created,
    Running(Arc<EngineRuntime>),
    Stopped,
}

/// Worker controller: bounded queue, elastic worker pool, retries and plugins.
///
/// ```ignore
/// let engine = Engine::new(EngineConfig::default().with_max_workers(4))
///     .with_plugin(Arc::new(MetricsPlugin::default()));
/// engine.start()?;
/// engine.enqueue(JobContext::new(), Arc::new(SendEmail::new(..)))?;
/// engine.stop().await?;
/// ```
pub struct Engine {
    config: EngineConfig,
    plugins: Vec<Arc<dyn Plugin>>,
    state: Mutex<EngineState>,
    next_worker_id: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            state: Mutex::new(EngineState::Created),
            next_worker_id: AtomicU64::new(1),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the queue and the worker capacity tracker.
    ///
    /// Must be called from within a Tokio runtime, which is used to spawn
    /// workers. Calling it a second time is a caller error and is reported
    /// as [`EngineError::AlreadyStarted`].
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        let handle = Handle::try_current()?;

        let mut state = self.lock();
        if !matches!(*state, EngineState::Created) {
            return Err(EngineError::AlreadyStarted);
        }

        let executor = JobExecutor::new(
            PluginChain::new(self.plugins.clone()),
            self.config.max_attempts,
        );
        *state = EngineState::Running(Arc::new(EngineRuntime {
            queue: Arc::new(JobQueue::with_capacity(self.config.max_queue_size)),
            slots: Arc::new(Semaphore::new(self.config.max_workers)),
            workers: TaskTracker::new(),
            executor: Arc::new(executor),
            handle,
        }));

        tracing::info!(
            max_attempts = self.config.max_attempts,
            max_queue_size = self.config.max_queue_size,
            max_workers = self.config.max_workers,
            inactivity_timeout_ms = self.config.inactivity_timeout_ms,
            plugins = self.plugins.len(),
            "Engine started"
        );
        Ok(())
    }

    /// Stop accepting work and wait for every worker to finish.
    ///
    /// Jobs already admitted are run to the end of their retry loop before
    /// this returns. A second call returns [`EngineError::NotRunning`].
    pub async fn stop(&self) -> Result<()> {
        let runtime = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, EngineState::Stopped) {
                EngineState::Running(runtime) => runtime,
                previous => {
                    *state = previous;
                    return Err(EngineError::NotRunning);
                }
            }
        };

        tracing::info!(queued = runtime.queue.len(), "Stopping engine");

        runtime.queue.close();
        runtime.workers.close();
        runtime.workers.wait().await;
        runtime.slots.close();

        let stranded = runtime.queue.len();
        if stranded > 0 {
            tracing::warn!(stranded, "Dropping jobs left without a worker");
        }

        tracing::info!("Engine stopped");
        Ok(())
    }

    /// Admit a job without waiting.
    ///
    /// Spawns a worker first if a capacity slot is free, then pushes the job.
    /// The two steps are independent: a full queue can still leave a freshly
    /// spawned worker idle. A returned `Ok` means the job was admitted, not
    /// that it will succeed.
    pub fn enqueue(&self, ctx: JobContext, job: Arc<dyn Job>) -> Result<()> {
        let runtime = {
            let state = self.lock();
            let runtime = Self::running(&state)?;
            // Spawning under the state lock orders it before any `stop`, so
            // every worker is covered by the drain.
            if let Ok(slot) = runtime.slots.clone().try_acquire_owned() {
                self.spawn_worker(runtime, slot);
            }
            runtime.clone()
        };

        let job_id = job.job_id().to_string();
        runtime
            .queue
            .try_push(QueuedJob::new(ctx, job))
            .map_err(|e| {
                tracing::debug!(job_id = %job_id, error = %e, "Job rejected");
                e
            })
    }

    fn running(state: &EngineState) -> Result<&Arc<EngineRuntime>> {
        match state {
            EngineState::Created => Err(EngineError::NotStarted),
            EngineState::Running(runtime) => Ok(runtime),
            EngineState::Stopped => Err(EngineError::QueueClosed),
        }
    }

    fn spawn_worker(&self, runtime: &EngineRuntime, slot: OwnedSemaphorePermit) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::new(
            id,
            runtime.queue.clone(),
            runtime.executor.clone(),
            self.config.inactivity_timeout(),
            slot,
        );
        let span = tracing::info_span!("worker", worker_id = id);
        runtime.workers.spawn_on(
            async move {
                worker.run().await;
            }
            .instrument(span),
            &runtime.handle,
        );
    }

    /// Number of capacity slots currently held by live workers.
    pub fn active_workers(&self) -> usize {
        match &*self.lock() {
            EngineState::Running(runtime) => {
                self.config.max_workers - runtime.slots.available_permits()
            }
            _ => 0,
        }
    }

    /// Number of admitted jobs not yet taken by a worker.
    pub fn queued_jobs(&self) -> usize {
        match &*self.lock() {
            EngineState::Running(runtime) => runtime.queue.len(),
            _ => 0,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), EngineState::Running(_))
    }
}

#[async_trait]
impl JobEngine for Engine {
    fn start(&self) -> Result<()> {
        Engine::start(self)
    }

    async fn stop(&self) -> Result<()> {
        Engine::stop(self).await
    }

    fn enqueue(&self, ctx: JobContext, job: Arc<dyn Job>) -> Result<()> {
        Engine::enqueue(self, ctx, job)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("plugins", &self.plugins.len())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobError;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn job_id(&self) -> &str {
            "noop"
        }

        fn job_type(&self) -> &str {
            "noop"
        }

        async fn exec(&self, _ctx: &JobContext) -> std::result::Result<(), JobError> {
            Ok(())
        }
    }

    fn current_runtime(engine: &Engine) -> Arc<EngineRuntime> {
        match &*engine.lock() {
            EngineState::Running(runtime) => runtime.clone(),
            _ => panic!("engine is not running"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_worker_outlives_stop_under_concurrent_enqueue() {
        for _ in 0..50 {
            let engine = Arc::new(Engine::new(
                EngineConfig::default()
                    .with_max_workers(4)
                    .with_inactivity_timeout(std::time::Duration::from_millis(1)),
            ));
            engine.start().unwrap();
            let runtime = current_runtime(&engine);

            let producer = {
                let engine = engine.clone();
                tokio::spawn(async move {
                    loop {
                        match engine.enqueue(JobContext::new(), Arc::new(Noop)) {
                            Err(EngineError::QueueClosed) => break,
                            _ => tokio::task::yield_now().await,
                        }
                    }
                })
            };

            tokio::task::yield_now().await;
            engine.stop().await.unwrap();
            producer.await.unwrap();

            assert!(runtime.workers.is_empty(), "a worker was spawned after the drain");
            assert_eq!(runtime.slots.available_permits(), 4);
        }
    }
}
