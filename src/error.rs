//! # Error Types
//!
//! Custom error types for the balloon telemetry ground station using `thiserror`.
//!
//! None of these are fatal to the ingestion task. Each one is handled at the
//! component boundary where it occurs: link errors become a status transition,
//! decode and parse errors drop a frame or a field, sink errors are logged.

use thiserror::Error;

/// Main error type for the telemetry pipeline
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Physical link open/read failure
    #[error("Link error: {0}")]
    Link(String),

    /// Configured serial device could not be opened
    #[error("Serial port not found: {0}")]
    SerialPortNotFound(String),

    /// Line could not be decoded or carried no known marker
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// One field or section of a frame failed to parse
    #[error("Field parse error in {section}.{field}: {reason}")]
    FieldParse {
        section: String,
        field: String,
        reason: String,
    },

    /// Persistence failure
    #[error("Sink write error: {0}")]
    SinkWrite(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for the telemetry pipeline
pub type Result<T> = std::result::Result<T, TelemetryError>;
