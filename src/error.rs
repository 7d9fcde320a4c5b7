use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("config load failed: {0}")]
    Config(String),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition { job_id: String, from: String, to: String },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown reservation token")]
    UnknownToken,

    #[error("insufficient resources on site {0}")]
    InsufficientResources(String),

    /// A filter's distinguished escape hatch (spec.md §4.7/§4.9): poisons
    /// the run the same way an `Executor` returning `ExecutorOutcome::Unsafe`
    /// does, rather than just rejecting the one message.
    #[error("filter marked the job unsafe: {0}")]
    Unsafe(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned(e.to_string())
    }
}
