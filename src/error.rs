use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("The job queue is full")]
    QueueFull,

    #[error("The job queue is closed")]
    QueueClosed,

    #[error("Engine has not been started")]
    NotStarted,

    #[error("Engine has already been started")]
    AlreadyStarted,

    #[error("Engine is not running")]
    NotRunning,

    #[error("No Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Errors raised when reading annotations from a [`JobContext`](crate::context::JobContext).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Annotation `{key}` holds a `{found}`, expected `{expected}`")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
