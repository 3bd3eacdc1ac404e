use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for an [`Engine`](crate::engine::Engine).
///
/// Applied before `start` and immutable afterwards. Missing fields in a
/// serialized document fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a failing job is executed before it is dropped.
    pub max_attempts: usize,
    /// Number of admitted jobs that may wait for a worker.
    /// Zero means a job is only admitted when an idle worker can take it.
    pub max_queue_size: usize,
    /// Upper bound on concurrently alive workers.
    pub max_workers: usize,
    /// How long a worker waits for new work before it exits.
    pub inactivity_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            max_queue_size: Self::DEFAULT_MAX_QUEUE_SIZE,
            max_workers: Self::DEFAULT_MAX_WORKERS,
            inactivity_timeout_ms: Self::DEFAULT_INACTIVITY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 1;
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
    pub const DEFAULT_MAX_WORKERS: usize = 1;
    pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 30_000;

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Stored in whole milliseconds, rounded up so a non-zero timeout never
    /// becomes zero.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.inactivity_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// Check the bounds the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a (possibly partial) JSON configuration document.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}
