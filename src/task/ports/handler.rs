//! Handler-side contracts: task handlers, completion callbacks and the
//! execution context handed to a running handler.

use crate::config::EngineConfig;
use crate::task::{
    domain::{PollResponse, Task, TaskDomainError, TaskId},
    ports::TaskStoreError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type returned by task handlers.
pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

/// Proof that a handler suspended its task through
/// [`ExecutionContext::suspend`].
///
/// Only the engine can construct a suspension, so a handler cannot report a
/// suspended outcome without actually persisting the `waiting` status.
#[derive(Debug, PartialEq, Eq)]
pub struct Suspension {
    task_id: TaskId,
}

impl Suspension {
    pub(crate) const fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }

    /// Returns the suspended task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// How a handler concluded.
#[derive(Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler produced a final result.
    Completed(Value),
    /// The handler suspended the task pending an external continuation.
    Suspended(Suspension),
}

impl HandlerOutcome {
    /// Convenience constructor for a completed outcome.
    #[must_use]
    pub const fn completed(result: Value) -> Self {
        Self::Completed(result)
    }
}

/// Handler module resolved from a task's type and script name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Executes the task.
    ///
    /// `task` is a snapshot taken at dispatch. Progress, polling and
    /// suspension go through `ctx`, which persists them on the live record.
    async fn run(
        &self,
        task: &Task,
        config: &EngineConfig,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult;
}

/// Type-specific logic invoked with a task's final result before the task is
/// marked successful.
#[async_trait]
pub trait CompletionCallback: Send + Sync {
    /// Applies the task result to the domain object the task targets.
    ///
    /// # Errors
    ///
    /// A returned error marks the task `failed` instead of `success`.
    async fn on_complete(
        &self,
        task: &Task,
        result: &Value,
        context: Option<&Value>,
    ) -> Result<(), CallbackError>;
}

/// Capabilities available to a handler while it runs.
///
/// One context is bound to one task for the duration of a single dispatch.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Returns the task this context is bound to.
    fn task_id(&self) -> TaskId;

    /// Records advisory progress. Persistence failures are logged and
    /// otherwise ignored.
    async fn report_progress(&self, progress: u8);

    /// Repeatedly invokes `probe` until it reports a terminal outcome or the
    /// attempt limit is exhausted, recording every attempt on the task.
    ///
    /// # Errors
    ///
    /// Returns a [`PollError`] on failure, timeout, probe error, or when a
    /// poll loop is already active for this task.
    async fn poll(&self, probe: &mut dyn PollProbe, options: PollOptions)
    -> Result<Value, PollError>;

    /// Moves the task to `waiting` with `context` persisted, ending local
    /// execution. The handler should return the resulting outcome.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionContextError`] when the task can no longer be
    /// suspended or the store rejects the update.
    async fn suspend(&self, context: Value) -> Result<HandlerOutcome, ExecutionContextError>;
}

/// Zero-argument probe invoked by the polling engine.
///
/// Implemented for any `FnMut() -> impl Future<Output = Result<PollResponse,
/// ProbeError>>` closure whose future owns its data.
#[async_trait]
pub trait PollProbe: Send {
    /// Observes the external condition once.
    async fn probe(&mut self) -> Result<PollResponse, ProbeError>;
}

#[async_trait]
impl<F, Fut> PollProbe for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<PollResponse, ProbeError>> + Send + 'static,
{
    async fn probe(&mut self) -> Result<PollResponse, ProbeError> {
        (self)().await
    }
}

/// Per-call polling overrides; unset values come from [`EngineConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOptions {
    /// Maximum number of probe invocations.
    pub max_attempts: Option<u32>,
    /// Delay before each probe invocation.
    pub interval: Option<Duration>,
}

impl PollOptions {
    /// Overrides the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Overrides the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Resolves the effective attempt limit and interval.
    #[must_use]
    pub fn resolve(self, config: &EngineConfig) -> (u32, Duration) {
        (
            self.max_attempts.unwrap_or(config.max_poll_attempts),
            self.interval.unwrap_or(config.poll_interval),
        )
    }
}

/// Error raised by a poll probe.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// Probe failed with a message.
    #[error("{0}")]
    Message(String),
    /// Probe failed with an underlying error.
    #[error("probe error: {0}")]
    Source(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl ProbeError {
    /// Wraps an underlying error.
    pub fn from_error(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(err))
    }
}

/// Errors concluding a poll loop without a result.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// The probe reported a terminal failure.
    #[error("poll failed: {0}")]
    Failed(String),

    /// The probe never reported a terminal outcome.
    #[error("poll timed out after {attempts} attempts without a terminal result")]
    Timeout {
        /// Number of probe invocations made.
        attempts: u32,
    },

    /// The probe itself raised an error.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Another poll loop is already active for the task.
    #[error("a poll loop is already active for task {0}")]
    AlreadyPolling(TaskId),

    /// Recording a poll attempt failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Errors raised by execution context operations.
#[derive(Debug, Clone, Error)]
pub enum ExecutionContextError {
    /// The requested status change is invalid for the current task.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
    /// The store rejected the update.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Errors returned by task handlers.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Handler failed with a message.
    #[error("{0}")]
    Failed(String),
    /// A poll loop ended without a result.
    #[error(transparent)]
    Poll(#[from] PollError),
    /// An execution context operation failed.
    #[error(transparent)]
    Context(#[from] ExecutionContextError),
    /// Handler failed with an underlying error.
    #[error("handler error: {0}")]
    Other(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Creates a failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wraps an underlying error.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(err))
    }
}

/// Errors returned by completion callbacks.
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// Callback failed with a message.
    #[error("completion callback failed: {0}")]
    Failed(String),
    /// Callback failed with an underlying error.
    #[error("completion callback error: {0}")]
    Other(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl CallbackError {
    /// Creates a failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wraps an underlying error.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(err))
    }
}
