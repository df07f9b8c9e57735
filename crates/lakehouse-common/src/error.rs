//! Error types for the lakehouse pipeline
//!
//! Per-record problems (a value that will not cast, a record whose natural key
//! is unusable) are absorbed and counted by the stage that sees them. Every
//! variant here that reaches a caller aborts the run it came from.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, LakeError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum LakeError {
    /// Connection, query or HTTP failure. Retried by whoever schedules the job.
    #[error("Source unavailable ({source_id}): {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// A value could not be coerced to its declared type.
    #[error("Schema violation on field '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    /// The checkpoint document exists but is not a valid watermark map.
    #[error("Corrupt checkpoint at '{key}': {reason}")]
    CorruptCheckpoint { key: String, reason: String },

    /// Some independent sub-sources failed while their siblings succeeded.
    #[error("{failed} of {total} sub-sources failed: {}", .failures.join("; "))]
    PartialBatchFailure {
        failed: usize,
        total: usize,
        failures: Vec<String>,
    },

    #[error("Raw artifact already exists: {0}")]
    ArtifactExists(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Columnar encoding error: {0}")]
    Columnar(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LakeError {
    pub fn source_unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema_violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_checkpoint(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptCheckpoint {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl ToString) -> Self {
        Self::Storage(reason.to_string())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn invalid_schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema(reason.into())
    }

    /// Build a [`LakeError::PartialBatchFailure`] from `(name, error)` pairs.
    pub fn partial(total: usize, failures: &[(String, LakeError)]) -> Self {
        Self::PartialBatchFailure {
            failed: failures.len(),
            total,
            failures: failures
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect(),
        }
    }
}
