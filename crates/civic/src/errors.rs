//! Error taxonomy for issue operations.
//!
//! Storage backends report failures as [`anyhow::Error`] with context; the
//! service layer classifies them into [`IssueError`] so callers (the HTTP
//! layer in particular) can map each kind to a response.

use crate::domain::Status;
use thiserror::Error;

/// Failure of an issue operation.
#[derive(Debug, Error)]
pub enum IssueError {
    /// A required field is missing or a value is outside its allowed set
    #[error("{0}")]
    Validation(String),

    /// No issue matches the given id (absent or malformed)
    #[error("Issue not found: {0}")]
    NotFound(String),

    /// The configured transition policy forbids this status change
    #[error("Cannot move issue from '{from}' to '{to}'")]
    InvalidTransition { from: Status, to: Status },

    /// The backing store failed (connectivity, I/O, serialization)
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl IssueError {
    pub fn not_found(id: impl Into<String>) -> Self {
        IssueError::NotFound(id.into())
    }
}

/// Result alias for issue operations.
pub type IssueResult<T> = Result<T, IssueError>;
