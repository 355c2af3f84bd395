//! Error types for skybatch
//!
//! Controller and CLI facing errors. Per-item failures never surface here;
//! they are recorded in the run result.

use thiserror::Error;

/// Batch error type
#[derive(Debug, Error)]
pub enum BatchError {
    /// A run is already active
    #[error("A batch run is already in progress")]
    RunInProgress,

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// skybatch-common error
    #[error("Common error: {0}")]
    Common(#[from] skybatch_common::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for batch operations
pub type BatchResult<T> = Result<T, BatchError>;
