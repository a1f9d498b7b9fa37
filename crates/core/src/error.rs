use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunlensError {
    /// Malformed or incomplete raw span; the caller skips the span and the
    /// batch continues.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unexpected shape beyond what validation guards against; the caller
    /// aborts the current batch.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunlensError>;
