//! Admission backpressure.
//!
//! These tests validate that:
//! - When the bounded queue is full, `enqueue` returns `QueueFull` immediately
//!   rather than blocking.
//! - A rejected job is never executed.
//! - A zero-sized queue only admits a job that an idle worker can take at once.


use std::sync::Arc;
use std::time::{Duration, Instant};

use jobhive::{Engine, EngineConfig, EngineError, JobContext};
use test_harness::{wait_until, ScriptedJob};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_full_when_worker_busy() {
    let engine = Engine::new(EngineConfig::default().with_max_queue_size(1));
    assert_eq!(engine.config().max_queue_size, 1);
    engine.start().unwrap();

    let long = Arc::new(ScriptedJob::new("long").sleeping(Duration::from_millis(500)));
    engine.enqueue(JobContext::new(), long.clone()).unwrap();
    assert_eq!(engine.active_workers(), 1);

    // Wait for the only worker to pick the long job up
    assert!(wait_until(Duration::from_secs(1), || long.attempts() == 1).await);

    let queued = Arc::new(ScriptedJob::new("queued"));
    engine.enqueue(JobContext::new(), queued.clone()).unwrap();
    assert_eq!(engine.queued_jobs(), 1);

    let rejected = Arc::new(ScriptedJob::new("rejected"));
    let start = Instant::now();
    let result = engine.enqueue(JobContext::new(), rejected.clone());
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(EngineError::QueueFull)));
    assert_eq!(result.unwrap_err().to_string(), "The job queue is full");
    // Must complete nearly instantly, not block until the queue drains
    assert!(
        elapsed < Duration::from_millis(50),
        "enqueue must be non-blocking (took {:?})",
        elapsed
    );

    engine.stop().await.unwrap();
    assert_eq!(long.attempts(), 1);
    assert_eq!(queued.attempts(), 1);
    assert_eq!(rejected.attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_accepts_again_after_draining() {
    let engine = Engine::new(EngineConfig::default().with_max_queue_size(1));
    engine.start().unwrap();

    let long = Arc::new(ScriptedJob::new("long").sleeping(Duration::from_millis(100)));
    engine.enqueue(JobContext::new(), long.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || long.attempts() == 1).await);

    engine
        .enqueue(JobContext::new(), Arc::new(ScriptedJob::new("fills")))
        .unwrap();
    assert!(matches!(
        engine.enqueue(JobContext::new(), Arc::new(ScriptedJob::new("bounced"))),
        Err(EngineError::QueueFull)
    ));

    assert!(wait_until(Duration::from_secs(1), || engine.queued_jobs() == 0).await);
    let retry = Arc::new(ScriptedJob::new("retried"));
    engine.enqueue(JobContext::new(), retry.clone()).unwrap();

    engine.stop().await.unwrap();
    assert_eq!(retry.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_sized_queue_hands_off_to_idle_worker() {
    let engine = Engine::new(EngineConfig::default().with_max_queue_size(0));
    engine.start().unwrap();

    // The first call spawns a worker; whether its job is admitted depends on
    // whether that worker is already waiting, so only the slot is checked.
    let _ = engine.enqueue(JobContext::new(), Arc::new(ScriptedJob::new("spawner")));
    assert_eq!(engine.active_workers(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let handed_off = Arc::new(ScriptedJob::new("handed-off"));
    engine.enqueue(JobContext::new(), handed_off.clone()).unwrap();

    engine.stop().await.unwrap();
    assert_eq!(handed_off.attempts(), 1);
}

#[tokio::test]
async fn test_zero_sized_queue_rejects_when_no_worker_waits() {
    let engine = Engine::new(EngineConfig::default().with_max_queue_size(0));
    engine.start().unwrap();

    // On a current-thread runtime the spawned worker cannot run before
    // `enqueue` returns, so nobody is waiting for the job.
    let result = engine.enqueue(JobContext::new(), Arc::new(ScriptedJob::new("nobody")));
    assert!(matches!(result, Err(EngineError::QueueFull)));

    engine.stop().await.unwrap();
}
