//! Engine configuration.
//!
//! [`EngineConfig`] is plain data: hosts build it in code or deserialize it
//! from whatever configuration source they already use. Missing fields take
//! their defaults, and durations are expressed in milliseconds.

use crate::task::domain::TaskStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Source statuses from which a task may be retried.
///
/// Retry is always additionally subject to the task state machine, so only
/// `failed` and `canceled` can ever be effective members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryPolicy(BTreeSet<TaskStatus>);

impl RetryPolicy {
    /// Creates a policy accepting the given source statuses.
    #[must_use]
    pub fn new(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        Self(statuses.into_iter().collect())
    }

    /// Policy accepting only `failed` tasks.
    #[must_use]
    pub fn failed_only() -> Self {
        Self::new([TaskStatus::Failed])
    }

    /// Returns whether tasks in `status` may be retried.
    #[must_use]
    pub fn permits(&self, status: TaskStatus) -> bool {
        self.0.contains(&status) && status.can_transition_to(TaskStatus::Pending)
    }

    /// Returns the configured source statuses.
    pub fn statuses(&self) -> impl Iterator<Item = TaskStatus> + '_ {
        self.0.iter().copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new([TaskStatus::Failed, TaskStatus::Canceled])
    }
}

/// Runtime configuration shared by the scheduler, dispatcher and services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of `system` tasks in `running` status.
    pub concurrency_limit: usize,
    /// Handler variant used when a task names none.
    pub default_script_name: String,
    /// Default number of poll attempts before timing out.
    pub max_poll_attempts: u32,
    /// Default delay before each poll attempt.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Period between scheduler ticks when driven by
    /// [`Scheduler::spawn_periodic`](crate::task::services::Scheduler::spawn_periodic).
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,
    /// Statuses from which retry is accepted.
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            default_script_name: "index".to_owned(),
            max_poll_attempts: 100,
            poll_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(600),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the running-task cap.
    #[must_use]
    pub const fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Sets the default handler variant.
    #[must_use]
    pub fn with_default_script_name(mut self, name: impl Into<String>) -> Self {
        self.default_script_name = name.into();
        self
    }

    /// Sets the default poll attempt limit and interval.
    #[must_use]
    pub const fn with_polling(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_poll_attempts = max_attempts;
        self.poll_interval = interval;
        self
    }

    /// Sets the periodic tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
