use thiserror::Error;

/// Error kinds for the fingerprinting core, per the error-handling table in the spec.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to decode audio file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("track {0} not found")]
    NotFound(i64),

    #[error("operation timed out")]
    Timeout,

    #[error("transient store error after retries: {0}")]
    Transient(String),

    #[error("catalog store integrity check failed: {0}")]
    Corruption(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
