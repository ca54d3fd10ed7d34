//! Error types for the sync engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sync engine.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal, nothing touched yet)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("A checkpoint exists for job '{0}'; pass --resume to continue it or --force to start over")]
    CheckpointExists(String),

    // Planning errors (fatal, no journal opened)
    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Path escapes root: {0}")]
    PathEscapesRoot(String),

    // Journal / checkpoint persistence (fatal mid-run, triggers rollback)
    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Invalid journal file: {0}")]
    InvalidJournalFile(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // Rollback errors
    #[error("Rollback failed: {0}")]
    Rollback(String),

    // Run was cancelled from the outside
    #[error("Run cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }
}
