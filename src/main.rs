mod shutdown;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobhive::{
    AnnotationKey, Engine, EngineConfig, EngineError, Job, JobContext, JobError, JobInfo, Plugin,
};

#[derive(Parser, Debug)]
#[command(name = "jobhive")]
#[command(version)]
#[command(about = "Drive the in-process job engine with a synthetic workload")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Enqueue synthetic jobs and report how they fared
    Run(RunArgs),

    /// Print the effective engine configuration
    Config(EngineArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct EngineArgs {
    /// JSON configuration file; command-line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Maximum number of queued jobs
    #[arg(long)]
    queue_size: Option<usize>,

    /// Attempts per job before it is dropped
    #[arg(long)]
    attempts: Option<usize>,

    /// Idle time after which a worker exits (milliseconds)
    #[arg(long)]
    idle_ms: Option<u64>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Number of jobs to enqueue
    #[arg(long, default_value = "100")]
    jobs: usize,

    /// Simulated duration of one attempt (milliseconds)
    #[arg(long, default_value = "20")]
    job_ms: u64,

    /// Probability that an attempt fails
    #[arg(long, default_value = "0.2")]
    fail_rate: f64,

    /// Probability that an attempt panics
    #[arg(long, default_value = "0.0")]
    panic_rate: f64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl EngineArgs {
    fn resolve(&self) -> Result<EngineConfig, EngineError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(queue_size) = self.queue_size {
            config.max_queue_size = queue_size;
        }
        if let Some(attempts) = self.attempts {
            config.max_attempts = attempts;
        }
        if let Some(idle_ms) = self.idle_ms {
            config.inactivity_timeout_ms = idle_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Synthetic Workload
// =============================================================================

struct SimulatedJob {
    id: String,
    duration: Duration,
    fail_rate: f64,
    panic_rate: f64,
}

#[async_trait]
impl Job for SimulatedJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn job_type(&self) -> &str {
        "simulated"
    }

    fn tags(&self) -> Vec<String> {
        vec!["demo".to_string()]
    }

    async fn exec(&self, ctx: &JobContext) -> Result<(), JobError> {
        tokio::select! {
            _ = ctx.cancelled() => bail!("cancelled"),
            _ = tokio::time::sleep(self.duration) => {}
        }

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.panic_rate {
            panic!("simulated crash in job {}", self.id);
        }
        if roll < self.panic_rate + self.fail_rate {
            bail!("simulated failure");
        }
        Ok(())
    }
}

const STARTED_AT: AnnotationKey<Instant> = AnnotationKey::new("demo.started_at");
const ATTEMPT: AnnotationKey<usize> = AnnotationKey::new("demo.attempt");

/// Counts hook invocations and logs per-attempt timings.
#[derive(Default)]
struct StatsPlugin {
    starts: AtomicUsize,
    ends: AtomicUsize,
    errors: AtomicUsize,
}

impl StatsPlugin {
    fn elapsed_ms(ctx: &JobContext) -> u64 {
        match ctx.value(&STARTED_AT) {
            Ok(Some(started)) => started.elapsed().as_millis() as u64,
            _ => 0,
        }
    }
}

impl Plugin for StatsPlugin {
    fn on_job_start(&self, ctx: JobContext, _job: &JobInfo) -> JobContext {
        self.starts.fetch_add(1, Ordering::Relaxed);
        let attempt = ctx.value(&ATTEMPT).ok().flatten().copied().unwrap_or(0) + 1;
        ctx.with_value(&ATTEMPT, attempt)
            .with_value(&STARTED_AT, Instant::now())
    }

    fn on_job_end(&self, ctx: &JobContext, job: &JobInfo) {
        self.ends.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            job_id = %job.id,
            attempt = ctx.value(&ATTEMPT).ok().flatten().copied().unwrap_or(0),
            elapsed_ms = Self::elapsed_ms(ctx),
            "Job succeeded"
        );
    }

    fn on_job_error(&self, ctx: JobContext, job: &JobInfo, error: &JobError) -> JobContext {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            job_id = %job.id,
            attempt = ctx.value(&ATTEMPT).ok().flatten().copied().unwrap_or(0),
            elapsed_ms = Self::elapsed_ms(&ctx),
            error = %error,
            "Job attempt failed"
        );
        ctx
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunSummary {
    config: EngineConfig,
    admitted: usize,
    rejected: usize,
    attempts: usize,
    succeeded: usize,
    failed_attempts: usize,
    unfinished_attempts: usize,
    elapsed_ms: u64,
}

// =============================================================================
// Commands
// =============================================================================

async fn run_workload(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.engine.resolve()?;
    let shutdown = shutdown::job_root_token()?;

    let stats = Arc::new(StatsPlugin::default());
    let engine = Engine::new(config.clone()).with_plugin(stats.clone());
    engine.start()?;

    let started = Instant::now();
    let mut admitted = 0usize;
    let mut rejected = 0usize;

    for _ in 0..args.jobs {
        if shutdown.is_cancelled() {
            tracing::info!("Shutdown requested, no more jobs will be enqueued");
            break;
        }

        let job = Arc::new(SimulatedJob {
            id: Uuid::new_v4().to_string(),
            duration: Duration::from_millis(args.job_ms),
            fail_rate: args.fail_rate,
            panic_rate: args.panic_rate,
        });
        let ctx = JobContext::with_cancellation(shutdown.child_token());

        match engine.enqueue(ctx, job) {
            Ok(()) => admitted += 1,
            Err(EngineError::QueueFull) => {
                rejected += 1;
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    engine.stop().await?;

    let starts = stats.starts.load(Ordering::Relaxed);
    let ends = stats.ends.load(Ordering::Relaxed);
    let errors = stats.errors.load(Ordering::Relaxed);
    let summary = RunSummary {
        config,
        admitted,
        rejected,
        attempts: starts,
        succeeded: ends,
        failed_attempts: errors,
        unfinished_attempts: starts.saturating_sub(ends + errors),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => {
            println!("Run Summary");
            println!("{}", "=".repeat(40));
            println!("Workers:          {}", summary.config.max_workers);
            println!("Queue size:       {}", summary.config.max_queue_size);
            println!("Max attempts:     {}", summary.config.max_attempts);
            println!("{}", "-".repeat(40));
            println!("Admitted:         {}", summary.admitted);
            println!("Rejected (full):  {}", summary.rejected);
            println!("Attempts:         {}", summary.attempts);
            println!("Succeeded:        {}", summary.succeeded);
            println!("Failed attempts:  {}", summary.failed_attempts);
            if summary.unfinished_attempts > 0 {
                println!("Crashed attempts: {}", summary.unfinished_attempts);
            }
            println!("Elapsed:          {} ms", summary.elapsed_ms);
        }
    }
    Ok(())
}

fn print_config(args: EngineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_workload(run_args).await?,
        Commands::Config(engine_args) => print_config(engine_args)?,
    }

    Ok(())
}
