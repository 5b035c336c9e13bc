//! Error types for actilyze-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the actilyze-core library
#[derive(Error, Debug)]
pub enum Error {
    /// No usable interpreter after checking persisted state and platform locations
    #[error("Rscript interpreter not found ({searched} candidate locations checked)")]
    RuntimeNotFound { searched: usize },

    /// The external executable could not be launched
    #[error("failed to start analysis process: {0}")]
    ProcessStart(String),

    /// The run was cancelled on request
    #[error("analysis process was cancelled")]
    ProcessCancelled,

    /// The external executable exited unsuccessfully
    #[error("analysis process failed (exit code {exit_code:?}): {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A classified tabular artifact could not be parsed
    #[error("CSV parse error in {}: {message}", path.display())]
    CsvParse { path: PathBuf, message: String },

    /// A report document lacks one of the envelope sentinels
    #[error("envelope marker missing: {0}")]
    EnvelopeMarkerMissing(&'static str),

    /// The embedded token could not be decoded into a snapshot
    #[error("snapshot decode error: {0}")]
    CodecDecode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for actilyze-core
pub type Result<T> = std::result::Result<T, Error>;
