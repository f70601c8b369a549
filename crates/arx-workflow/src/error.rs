//! Error types for workflow dispatch

use thiserror::Error;

use crate::workflow::WorkflowStatus;

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by workflows and workflow stores
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value for variable '{name}': {reason}")]
    InvalidVariable { name: String, reason: String },
}

/// Errors raised by the execution tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Execution already tracked: {0}")]
    Duplicate(String),

    #[error("Execution not found: {0}")]
    NotFound(String),

    #[error("Workflow {workflow_id} at concurrency ceiling ({in_flight}/{ceiling})")]
    CeilingReached {
        workflow_id: String,
        in_flight: usize,
        ceiling: usize,
    },
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors raised while starting an execution
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker pool saturated")]
    Saturated,

    #[error("Workflow {workflow_id} is {status} and cannot be executed")]
    NotExecutable {
        workflow_id: String,
        status: WorkflowStatus,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors reported by an execution runner
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Action {action} failed: {message}")]
    Action { action: String, message: String },

    #[error("Execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Runner error: {0}")]
    Internal(String),
}
