//! Transfer Result
//!
//! Every upload collapses into exactly one of these before it leaves the
//! pipeline. Only [`TransferResult::Success`] carries an identifier, so a
//! failed upload can never hand out a handle to a file.

use serde::Serialize;

/// Outcome of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferResult {
    /// Stored and anonymized; `id` retrieves it exactly once
    Success { id: String },

    /// Rejected before anything touched the disk
    ValidationFailure { reason: String },

    /// The file could not be persisted
    StorageFailure { reason: String },

    /// Detection or blurring failed; the stored file has been removed
    DetectionFailure { reason: String },
}

impl TransferResult {
    pub fn success(id: impl Into<String>) -> Self {
        Self::Success { id: id.into() }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailure {
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::StorageFailure {
            reason: reason.into(),
        }
    }

    pub fn detection(reason: impl Into<String>) -> Self {
        Self::DetectionFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Identifier of a successful upload
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Success { id } => Some(id),
            _ => None,
        }
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::ValidationFailure { reason }
            | Self::StorageFailure { reason }
            | Self::DetectionFailure { reason } => Some(reason),
        }
    }

    /// Label used for metrics and logs
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::StorageFailure { .. } => "storage_failure",
            Self::DetectionFailure { .. } => "detection_failure",
        }
    }
}
