pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod scheduler;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod worker;

pub use config::EngineConfig;
pub use context::{AnnotationKey, JobContext};
pub use engine::{Engine, JobEngine};
pub use error::{ContextError, EngineError, Result};
pub use plugin::{Plugin, PluginChain};
pub use scheduler::{Job, JobError, JobInfo};
