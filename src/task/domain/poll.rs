//! Poll outcomes recorded on a task while a handler waits on an external
//! system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome reported by a single poll probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// The external condition has not been reached yet.
    Pending,
    /// The external condition was reached.
    Success,
    /// The external system reported a terminal failure.
    Failed,
}

/// Response returned by a poll probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Outcome of this probe invocation.
    pub result: PollState,
    /// Payload resolved by the poll loop on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Diagnostic message, used as the rejection reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional progress hint forwarded to progress reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl PollResponse {
    /// A non-terminal response.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            result: PollState::Pending,
            data: None,
            message: None,
            progress: None,
        }
    }

    /// A terminal success response carrying `data`.
    #[must_use]
    pub const fn success(data: Value) -> Self {
        Self {
            result: PollState::Success,
            data: Some(data),
            message: None,
            progress: None,
        }
    }

    /// A terminal failure response carrying `message`.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: PollState::Failed,
            data: None,
            message: Some(message.into()),
            progress: None,
        }
    }

    /// Attaches a progress hint.
    #[must_use]
    pub const fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// One recorded poll attempt, appended to the task's poll history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    /// One-based attempt number within the current poll loop.
    pub attempt: u32,
    /// When the attempt completed.
    pub recorded_at: DateTime<Utc>,
    /// Outcome of the attempt.
    pub result: PollState,
    /// Payload returned by the probe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Message returned by the probe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Progress hint returned by the probe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl PollRecord {
    /// Builds a record from a probe response.
    #[must_use]
    pub fn from_response(attempt: u32, recorded_at: DateTime<Utc>, response: &PollResponse) -> Self {
        Self {
            attempt,
            recorded_at,
            result: response.result,
            data: response.data.clone(),
            message: response.message.clone(),
            progress: response.progress,
        }
    }
}
