use std::path::PathBuf;
use thiserror::Error;

use crate::edit::MetadataField;
use crate::job::JobId;

/// Failures raised by a conversion pipeline step.
///
/// Every variant aborts the current job only; the orchestrator marks the job
/// `failed` with the rendered message, except for `ConversionCancelled`
/// which resets the job to `queued`.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Required tool not found: {}", path.display())]
    MissingBinary { path: PathBuf },

    #[error("Conversion failed (exit code {}): {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ConversionFailed { exit_code: Option<i32>, stderr: String },

    #[error("Conversion cancelled: {}", source_path.display())]
    ConversionCancelled { source_path: PathBuf },

    #[error("Output file missing: {}", path.display())]
    MissingOutputFile { path: PathBuf },

    #[error("Output file invalid ({size} bytes): {}", path.display())]
    InvalidOutputFile { path: PathBuf, size: u64 },

    #[error("Validation failed for {}: {reason}", path.display())]
    ValidationFailed { path: PathBuf, reason: String },

    #[error("Metadata processing failed for {}: {detail}", path.display())]
    MetadataProcessingFailed { path: PathBuf, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// True for the distinguished cancellation kind.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConversionError::ConversionCancelled { .. })
    }
}

/// Failures of explicit queue operations (edits, overrides).
#[derive(Error, Debug, PartialEq)]
pub enum QueueError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job is being processed: {0}")]
    JobBusy(JobId),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: MetadataField, value: String },
}

pub type Result<T> = std::result::Result<T, ConversionError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
