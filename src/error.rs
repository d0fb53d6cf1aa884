//! Canonical error type for all engine operations.
//!
//! Every fallible operation in the crate returns `Result<T, EngineError>`.
//! Display output is a single line of the form `<kind>: <detail>`; the HTTP
//! surface and the CLI both print it verbatim, never a backtrace.
//!
//! Duplicates are deliberately *not* an error: re-ingesting known content
//! succeeds with `IngestStatus::Skipped` (see [`crate::ingest`]).

use thiserror::Error;

/// Canonical error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Validation failure: empty input, bad enum value, budget too small.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An id lookup missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying storage failure; the enclosing transaction was rejected.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// File-system failure during ingest, snapshot, or log handling.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A search or generator deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The external generator failed; only the scribe and chat surface this.
    #[error("generator error: {0}")]
    Generator(String),

    /// Malformed snapshot or config payload.
    #[error("bad request: {0}")]
    Serde(String),

    /// Disk full or corrupted store; the host must stop accepting writes.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Crate-wide result alias.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Machine-readable code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::BadRequest(_) | EngineError::Serde(_) => "bad_request",
            EngineError::NotFound(_) => "not_found",
            EngineError::Timeout(_) => "timeout",
            EngineError::Generator(_) => "generator_error",
            EngineError::Store(_) | EngineError::Io(_) | EngineError::Fatal(_) => "internal",
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Serde(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serde(e.to_string())
    }
}
