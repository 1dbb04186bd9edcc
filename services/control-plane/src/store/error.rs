//! Store error types.

use corral_id::TaskId;
use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,

    /// A mutation targeted a task that does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The transaction work reported a failure and nothing was committed.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Snapshot or state export failed.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
