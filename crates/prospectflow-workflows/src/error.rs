//! Error types for workflow operations

use prospectflow_persistence::PersistenceError;
use thiserror::Error;

/// Errors that can occur during workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session, progress or state not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested transition is not allowed from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Imported state was produced by an unsupported version
    #[error("Incompatible state version: expected {expected}, found {found}")]
    IncompatibleVersion {
        /// Version this build understands
        expected: String,
        /// Version found in the payload
        found: String,
    },

    /// Checkpoint index out of range
    #[error("Invalid checkpoint index {index} (log has {len} entries)")]
    InvalidCheckpoint {
        /// Requested index
        index: usize,
        /// Number of checkpoints in the log
        len: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Background job failed
    #[error("Job failed: {0}")]
    Job(String),
}

impl WorkflowError {
    /// Shorthand for a missing session
    pub fn session_not_found(session_id: &str) -> Self {
        WorkflowError::NotFound(format!("Workflow session not found: {}", session_id))
    }

    /// Shorthand for missing progress
    pub fn progress_not_found(session_id: &str) -> Self {
        WorkflowError::NotFound(format!("Progress not found for session: {}", session_id))
    }

    /// Shorthand for missing state
    pub fn state_not_found(session_id: &str) -> Self {
        WorkflowError::NotFound(format!("Workflow state not found for session: {}", session_id))
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
