//! Signal handling for the `run` command.
//!
//! The token returned here is the parent of every [`JobContext`] the runner
//! creates. A SIGINT or SIGTERM therefore stops new enqueues and reaches
//! running jobs through `JobContext::cancelled`, while `Engine::stop` drains
//! whatever was already admitted.
//!
//! [`JobContext`]: jobhive::JobContext

use std::future::Future;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Root cancellation for job contexts, cancelled on SIGINT or SIGTERM.
pub fn job_root_token() -> io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let root = CancellationToken::new();
    cancel_on(root.clone(), async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    });
    Ok(root)
}

/// Cancel `root` once `trigger` resolves with the name of what fired.
/// The watcher ends quietly if `root` is cancelled some other way first.
fn cancel_on<F>(root: CancellationToken, trigger: F)
where
    F: Future<Output = &'static str> + Send + 'static,
{
    tokio::spawn(async move {
        let source = tokio::select! {
            source = trigger => source,
            _ = root.cancelled() => return,
        };
        tracing::warn!(source, "Cancelling job contexts, engine will drain admitted jobs");
        root.cancel();
    });
}
