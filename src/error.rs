//! # Error Types
//!
//! Custom error types for the telemetry archiver using `thiserror`.

use thiserror::Error;

/// Main error type for the telemetry archiver
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// Ingestion message is missing `sensor_data`/`sensor_units` or has the wrong shape
    #[error("Malformed ingestion message: {0}")]
    MalformedMessage(String),

    /// Ingest attempted on a record that is no longer live
    #[error("Record is sealed and no longer accepts samples")]
    RecordSealed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record file (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote archive host reported a failure
    #[error("Remote archive error: {0}")]
    Remote(String),

    /// A remote operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A range bound is not a 14-digit record stamp
    #[error("Invalid record timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for the telemetry archiver
pub type Result<T> = std::result::Result<T, ArchiverError>;
