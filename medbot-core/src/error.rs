use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a doctor with email {0} already exists")]
    DuplicateEmail(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure modes of an external analysis program.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("argument {index} for {program} contains a NUL character")]
    InvalidArgument { program: String, index: usize },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} produced no output")]
    NoOutput { program: String },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("unexpected output from {program}: {reason}")]
    MalformedOutput { program: String, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0}")]
    Missing(&'static str),

    #[error("unknown difficulty '{0}', expected easy, medium or hard")]
    UnknownDifficulty(String),

    #[error("score must be between 0 and 100, got {0}")]
    ScoreOutOfRange(u32),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::InvalidRecord(err.to_string())
    }
}
