//! Custom error types for the cleaning pipeline.
//!
//! This module provides the error hierarchy using `thiserror` for the
//! statistics, streaming, staging and assembly stages.
//!
//! Errors are serializable so a caller (CLI `--json`, a job runner) can
//! report them as a `code` plus `message` pair.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the cleaning pipeline.
#[derive(Error, Debug)]
pub enum CleaningError {
    /// Pipeline was cancelled through its cancellation token.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// The raw source cannot be read at all (missing file, permissions, bad header).
    #[error("Raw source unavailable: {0}")]
    SourceUnavailable(String),

    /// The statistics pass found no coercible age value, so no imputation value exists.
    #[error("No valid age values found in column '{0}'")]
    NoValidAgeData(String),

    /// A staging append kept failing after every retry.
    #[error("Failed to persist chunk {chunk} after {attempts} attempts: {reason}")]
    ChunkPersistFailure {
        chunk: usize,
        attempts: usize,
        reason: String,
    },

    /// Reading from or maintaining a staging area failed.
    #[error("Staging area '{label}' failed: {reason}")]
    StagingFailed { label: String, reason: String },

    /// Writing the balanced dataset failed. Staging areas are left in place.
    #[error("Failed to persist balanced dataset: {0}")]
    PersistFailed(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CleaningError>,
    },
}

impl CleaningError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CleaningError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for machine consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            Self::NoValidAgeData(_) => "NO_VALID_AGE_DATA",
            Self::ChunkPersistFailure { .. } => "CHUNK_PERSIST_FAILURE",
            Self::StagingFailed { .. } => "STAGING_FAILED",
            Self::PersistFailed(_) => "PERSIST_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if a later run can pick up where this one stopped.
    ///
    /// Cancellation and chunk/persist failures leave committed staging parts
    /// on disk; a persist failure can be retried with a finalize-only run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Cancelled | Self::ChunkPersistFailure { .. } | Self::PersistFailed(_) => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl Serialize for CleaningError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("CleaningError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for cleaning operations.
pub type Result<T> = std::result::Result<T, CleaningError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CleaningError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CleaningError::Io(e).with_context(context))
    }
}
