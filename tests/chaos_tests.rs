//! Crash-class faults: panics inside jobs or plugin hooks.
//!
//! These tests validate that:
//! - A panic never reaches the caller of `enqueue` and never aborts the process.
//! - The panicking worker exits and gives its capacity slot back.
//! - The job's remaining attempts are abandoned without end or error hooks.


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobhive::scheduler::{JobQueue, QueuedJob};
use jobhive::worker::{JobExecutor, Worker, WorkerExit};
use jobhive::{Engine, EngineConfig, JobContext, JobInfo, Plugin, PluginChain};
use tokio::sync::Semaphore;
use test_harness::{wait_until, Phase, RecordingPlugin, ScriptedJob};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_job_releases_worker_slot() {
    let engine = Engine::new(EngineConfig::default());
    engine.start().unwrap();

    let job = Arc::new(ScriptedJob::new("panics").panicking_on(1));
    let result = engine.enqueue(JobContext::new(), job.clone());
    assert!(result.is_ok());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.active_workers(), 0);
    assert_eq!(job.attempts(), 1);

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replacement_worker_after_panic() {
    let engine = Engine::new(EngineConfig::default());
    engine.start().unwrap();

    engine
        .enqueue(
            JobContext::new(),
            Arc::new(ScriptedJob::new("panics").panicking_on(1)),
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || engine.active_workers() == 0).await);

    let healthy = Arc::new(ScriptedJob::new("healthy"));
    engine.enqueue(JobContext::new(), healthy.clone()).unwrap();
    assert_eq!(engine.active_workers(), 1);

    engine.stop().await.unwrap();
    assert_eq!(healthy.attempts(), 1);
    assert!(healthy.finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_discards_remaining_retries() {
    let recorder = Arc::new(RecordingPlugin::default());
    let engine =
        Engine::new(EngineConfig::default().with_max_attempts(3)).with_plugin(recorder.clone());
    engine.start().unwrap();

    let job = Arc::new(ScriptedJob::new("crash").panicking_on(1));
    engine.enqueue(JobContext::new(), job.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || engine.active_workers() == 0).await);

    engine.stop().await.unwrap();
    assert_eq!(job.attempts(), 1);
    assert_eq!(recorder.phases_for("crash"), vec![Phase::Start]);
}

/// Plugin whose start hook panics for one job type.
struct ExplodingPlugin {
    exploded: AtomicBool,
}

impl Plugin for ExplodingPlugin {
    fn on_job_start(&self, ctx: JobContext, job: &JobInfo) -> JobContext {
        if job.id == "victim" {
            self.exploded.store(true, Ordering::SeqCst);
            panic!("plugin blew up on {}", job.id);
        }
        ctx
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_plugin_is_contained() {
    let plugin = Arc::new(ExplodingPlugin {
        exploded: AtomicBool::new(false),
    });
    let engine = Engine::new(EngineConfig::default()).with_plugin(plugin.clone());
    engine.start().unwrap();

    let victim = Arc::new(ScriptedJob::new("victim"));
    engine.enqueue(JobContext::new(), victim.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || engine.active_workers() == 0).await);
    assert!(plugin.exploded.load(Ordering::SeqCst));
    assert_eq!(victim.attempts(), 0);

    let survivor = Arc::new(ScriptedJob::new("survivor"));
    engine.enqueue(JobContext::new(), survivor.clone()).unwrap();
    engine.stop().await.unwrap();
    assert_eq!(survivor.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panic_in_one_worker_leaves_others_running() {
    let engine = Engine::new(EngineConfig::default().with_max_workers(2));
    engine.start().unwrap();

    let slow = Arc::new(ScriptedJob::new("slow").sleeping(Duration::from_millis(200)));
    engine.enqueue(JobContext::new(), slow.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || slow.attempts() == 1).await);

    engine
        .enqueue(
            JobContext::new(),
            Arc::new(ScriptedJob::new("panics").panicking_on(1)),
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || engine.active_workers() == 1).await);

    engine.stop().await.unwrap();
    assert!(slow.finished());
}

/// Job whose identity accessors can be made to panic.
struct BadIdentity {
    panic_in_id: bool,
}

#[async_trait::async_trait]
impl jobhive::Job for BadIdentity {
    fn job_id(&self) -> &str {
        if self.panic_in_id {
            panic!("job_id exploded");
        }
        "bad-identity"
    }

    fn job_type(&self) -> &str {
        "bad-identity"
    }

    fn tags(&self) -> Vec<String> {
        panic!("tags exploded");
    }

    async fn exec(&self, _ctx: &JobContext) -> Result<(), jobhive::JobError> {
        Ok(())
    }
}

async fn run_single_worker(job: BadIdentity) -> (WorkerExit, usize) {
    let slots = Arc::new(Semaphore::new(1));
    let queue = Arc::new(JobQueue::new());
    queue
        .try_push(QueuedJob::new(JobContext::new(), Arc::new(job)))
        .unwrap();
    queue.close();

    let slot = slots.clone().try_acquire_owned().unwrap();
    let executor = Arc::new(JobExecutor::new(PluginChain::default(), 3));
    let worker = Worker::new(7, queue, executor, Duration::from_secs(5), slot);

    let exit = tokio::spawn(worker.run())
        .await
        .expect("panic must not escape the worker task");
    (exit, slots.available_permits())
}

#[tokio::test]
async fn test_panicking_tags_stop_worker_as_fatal() {
    let (exit, free_slots) = run_single_worker(BadIdentity { panic_in_id: false }).await;

    match exit {
        WorkerExit::Fatal { job_id, message } => {
            assert_eq!(job_id.as_deref(), Some("bad-identity"));
            assert!(message.contains("tags exploded"), "message: {message}");
        }
        other => panic!("expected fatal exit, got {other:?}"),
    }
    assert_eq!(free_slots, 1);
}

#[tokio::test]
async fn test_panicking_job_id_stops_worker_as_fatal() {
    let (exit, free_slots) = run_single_worker(BadIdentity { panic_in_id: true }).await;

    match exit {
        WorkerExit::Fatal { job_id, message } => {
            assert_eq!(job_id, None);
            assert!(message.contains("job_id exploded"), "message: {message}");
        }
        other => panic!("expected fatal exit, got {other:?}"),
    }
    assert_eq!(free_slots, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identity_panic_through_engine_releases_slot() {
    let engine = Engine::new(EngineConfig::default());
    engine.start().unwrap();

    engine
        .enqueue(
            JobContext::new(),
            Arc::new(BadIdentity { panic_in_id: false }),
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || engine.active_workers() == 0).await);

    let healthy = Arc::new(ScriptedJob::new("after-identity-panic"));
    engine.enqueue(JobContext::new(), healthy.clone()).unwrap();
    engine.stop().await.unwrap();
    assert_eq!(healthy.attempts(), 1);
}
