//! Error types for task domain validation and parsing.

use super::{TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating domain task values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The task type is empty after trimming.
    #[error("task type must not be empty")]
    EmptyTaskType,

    /// The target object identifier is empty after trimming.
    #[error("task target id must not be empty")]
    EmptyTargetId,

    /// The target object type is empty after trimming.
    #[error("task target type must not be empty")]
    EmptyTargetType,

    /// The requested status change is not an edge of the task state machine.
    #[error("invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Task whose transition was rejected.
        task_id: TaskId,
        /// Status the task was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },
}

/// Error returned while parsing task statuses from persistence or requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing runner types from persistence or requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown runner type: {0}")]
pub struct ParseRunnerTypeError(pub String);
