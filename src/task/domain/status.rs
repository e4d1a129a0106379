//! Task status state machine and runner classification.

use super::{ParseRunnerTypeError, ParseTaskStatusError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued and has not been dispatched.
    Pending,
    /// A handler is currently executing the task.
    Running,
    /// The handler suspended the task pending an external continuation.
    Waiting,
    /// The task finished and its completion callback succeeded.
    Success,
    /// The task failed.
    Failed,
    /// An operator canceled the task.
    Canceled,
}

impl TaskStatus {
    /// All statuses in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Running,
        Self::Waiting,
        Self::Success,
        Self::Failed,
        Self::Canceled,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Returns whether `target` is reachable from this status in one step.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Running | Self::Canceled)
                | (
                    Self::Running,
                    Self::Success | Self::Waiting | Self::Failed | Self::Canceled
                )
                | (Self::Waiting, Self::Success | Self::Failed)
                | (Self::Failed | Self::Canceled, Self::Pending)
        )
    }

    /// Returns whether the task has concluded and awaits no further engine
    /// action.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }

    /// Returns whether an operator may cancel a task in this status.
    #[must_use]
    pub const fn is_cancelable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who advances a task through its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerType {
    /// Only explicit operator actions advance the task.
    #[default]
    Manual,
    /// The scheduler dispatches the task automatically.
    System,
}

impl RunnerType {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::System => "system",
        }
    }
}

impl TryFrom<&str> for RunnerType {
    type Error = ParseRunnerTypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "system" => Ok(Self::System),
            _ => Err(ParseRunnerTypeError(value.to_owned())),
        }
    }
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
