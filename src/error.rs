use std::path::PathBuf;
use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, BatchError>;

/// The Error type for batch ingestion operations.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidationError(String),

    #[error("Concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    #[error("A run is already in progress on this orchestrator")]
    RunInProgress,

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Error in extraction stage '{stage_name}': {source}")]
    StageError {
        stage_name: String,
        source: Box<BatchError>,
    },

    /// Raised by a stage or processor for a document it cannot handle.
    #[error("{0}")]
    ProcessingFailed(String),

    #[error("Cleanup handler '{handler}' failed: {message}")]
    CleanupError { handler: String, message: String },

    #[error("Metrics endpoint error: {0}")]
    MetricsError(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
