//! Failures that terminate an import invocation.

use octofhir_storage::StorageError;

use super::resource::ImportProcessingProgress;

/// Errors that end an import invocation.
///
/// Per-record problems never show up here; they are counted and written to the error
/// log instead.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The caller cancelled the import. Not to be retried automatically.
    #[error("Import cancelled at index {}", .progress.current_index)]
    Cancelled {
        /// Progress up to the last completed batch.
        progress: ImportProcessingProgress,
    },

    /// A lookup or merge against the store failed. The invocation may be re-driven from
    /// `progress.current_index`.
    #[error("Retriable import failure at index {}: {source}", .progress.current_index)]
    Retriable {
        progress: ImportProcessingProgress,
        #[source]
        source: StorageError,
    },

    /// The error log could not be uploaded.
    #[error(transparent)]
    ErrorUpload(StorageError),

    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),
}

impl ImportError {
    /// Returns true if the job scheduler may safely re-run the invocation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. })
    }

    /// Returns true if the caller cancelled the import.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Resume point carried by the error, if any.
    pub fn progress(&self) -> Option<&ImportProcessingProgress> {
        match self {
            Self::Cancelled { progress } | Self::Retriable { progress, .. } => Some(progress),
            Self::ErrorUpload(_) | Self::InvalidBatchSize(_) => None,
        }
    }
}
