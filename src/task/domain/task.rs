//! Task aggregate root.

use super::{
    PollRecord, RunnerType, TaskDomainError, TaskId, TaskStatus, TaskTarget, TaskType, UserId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Context key holding the continuation secret of a suspended task.
pub const CONTINUATION_SECRET_KEY: &str = "secret";

/// Advisory completion percentage, clamped to `0..=100`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Progress(u8);

impl Progress {
    /// Progress of a task that has just been dispatched.
    pub const ZERO: Self = Self(0);
    /// Progress of a successful task.
    pub const COMPLETE: Self = Self(100);

    /// Creates a progress value, saturating at 100.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        if value > 100 {
            Self::COMPLETE
        } else {
            Self(value)
        }
    }

    /// Returns the percentage.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Parameter object for creating a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Handler and callback selector.
    pub task_type: TaskType,
    /// Optional handler variant.
    pub script_name: Option<String>,
    /// Domain object the task acts on.
    pub target: TaskTarget,
    /// Who advances the task.
    pub runner_type: RunnerType,
    /// Earliest dispatch time.
    pub start_time: DateTime<Utc>,
    /// Handler input payload.
    pub input: Value,
    /// Handler-specific options.
    pub options: Value,
    /// Creator; `None` for system-created tasks.
    pub user_id: Option<UserId>,
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    task_type: TaskType,
    script_name: Option<String>,
    target: TaskTarget,
    runner_type: RunnerType,
    start_time: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    input: Value,
    output: Option<Value>,
    error: Option<Value>,
    status: TaskStatus,
    context: Value,
    poll_results: Vec<PollRecord>,
    poll_count: u32,
    progress: Progress,
    msg: Option<String>,
    options: Value,
    user_id: Option<UserId>,
    completed_user_id: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted task type.
    pub task_type: TaskType,
    /// Persisted handler variant.
    pub script_name: Option<String>,
    /// Persisted target reference.
    pub target: TaskTarget,
    /// Persisted runner type.
    pub runner_type: RunnerType,
    /// Persisted earliest dispatch time.
    pub start_time: DateTime<Utc>,
    /// Persisted completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Persisted input payload.
    pub input: Value,
    /// Persisted output payload.
    pub output: Option<Value>,
    /// Persisted error payload.
    pub error: Option<Value>,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted continuation context.
    pub context: Value,
    /// Persisted poll history.
    pub poll_results: Vec<PollRecord>,
    /// Persisted poll counter.
    pub poll_count: u32,
    /// Persisted progress.
    pub progress: Progress,
    /// Persisted message.
    pub msg: Option<String>,
    /// Persisted handler options.
    pub options: Value,
    /// Persisted creator.
    pub user_id: Option<UserId>,
    /// Persisted resolver.
    pub completed_user_id: Option<UserId>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new `pending` task.
    #[must_use]
    pub fn new(new_task: NewTask, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        let NewTask {
            task_type,
            script_name,
            target,
            runner_type,
            start_time,
            input,
            options,
            user_id,
        } = new_task;

        Self {
            id: TaskId::new(),
            task_type,
            script_name,
            target,
            runner_type,
            start_time,
            completed_at: None,
            input,
            output: None,
            error: None,
            status: TaskStatus::Pending,
            context: Value::Object(Map::new()),
            poll_results: Vec::new(),
            poll_count: 0,
            progress: Progress::ZERO,
            msg: None,
            options,
            user_id,
            completed_user_id: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            task_type: data.task_type,
            script_name: data.script_name,
            target: data.target,
            runner_type: data.runner_type,
            start_time: data.start_time,
            completed_at: data.completed_at,
            input: data.input,
            output: data.output,
            error: data.error,
            status: data.status,
            context: data.context,
            poll_results: data.poll_results,
            poll_count: data.poll_count,
            progress: data.progress,
            msg: data.msg,
            options: data.options,
            user_id: data.user_id,
            completed_user_id: data.completed_user_id,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task type.
    #[must_use]
    pub const fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    /// Returns the explicit handler variant, if any.
    #[must_use]
    pub fn script_name(&self) -> Option<&str> {
        self.script_name.as_deref()
    }

    /// Returns the target reference.
    #[must_use]
    pub const fn target(&self) -> &TaskTarget {
        &self.target
    }

    /// Returns the runner type.
    #[must_use]
    pub const fn runner_type(&self) -> RunnerType {
        self.runner_type
    }

    /// Returns the earliest dispatch time.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Returns the completion timestamp.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the input payload.
    #[must_use]
    pub const fn input(&self) -> &Value {
        &self.input
    }

    /// Returns the output payload.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Returns the error payload.
    #[must_use]
    pub const fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the continuation context.
    #[must_use]
    pub const fn context(&self) -> &Value {
        &self.context
    }

    /// Returns the continuation secret stored in the context when it is a
    /// string.
    #[must_use]
    pub fn continuation_secret(&self) -> Option<&str> {
        self.context
            .get(CONTINUATION_SECRET_KEY)
            .and_then(Value::as_str)
    }

    /// Returns whether the context carries a non-null `secret` of any JSON
    /// type. Continuations for such a task must be signed.
    #[must_use]
    pub fn holds_continuation_secret(&self) -> bool {
        self.context
            .get(CONTINUATION_SECRET_KEY)
            .is_some_and(|secret| !secret.is_null())
    }

    /// Returns the poll history of the current execution attempt.
    #[must_use]
    pub fn poll_results(&self) -> &[PollRecord] {
        &self.poll_results
    }

    /// Returns the number of poll attempts in the current execution attempt.
    #[must_use]
    pub const fn poll_count(&self) -> u32 {
        self.poll_count
    }

    /// Returns the advisory progress.
    #[must_use]
    pub const fn progress(&self) -> Progress {
        self.progress
    }

    /// Returns the free-text message.
    #[must_use]
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// Returns the handler options.
    #[must_use]
    pub const fn options(&self) -> &Value {
        &self.options
    }

    /// Returns the creator.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Returns the operator who resolved the task.
    #[must_use]
    pub const fn completed_user_id(&self) -> Option<&UserId> {
        self.completed_user_id.as_ref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves a `pending` task to `running` and starts a fresh execution
    /// attempt: progress, output, error and poll history are reset.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task is
    /// `pending`.
    pub fn start(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.progress = Progress::ZERO;
        self.output = None;
        self.error = None;
        self.poll_results.clear();
        self.poll_count = 0;
        self.touch(clock);
        Ok(())
    }

    /// Marks the task `success` with `output`, forcing progress to 100.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task is
    /// `running` or `waiting`.
    pub fn succeed(
        &mut self,
        output: Value,
        completed_by: Option<UserId>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Success)?;
        self.status = TaskStatus::Success;
        self.output = Some(output);
        self.progress = Progress::COMPLETE;
        self.complete(completed_by, clock);
        Ok(())
    }

    /// Marks the task `failed` with an error payload.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task is
    /// `running` or `waiting`.
    pub fn fail(
        &mut self,
        error: Value,
        completed_by: Option<UserId>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.complete(completed_by, clock);
        Ok(())
    }

    /// Suspends a `running` task pending an external continuation.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task is
    /// `running`.
    pub fn suspend(&mut self, context: Value, clock: &impl Clock) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Waiting)?;
        self.status = TaskStatus::Waiting;
        self.context = context;
        self.touch(clock);
        Ok(())
    }

    /// Cancels a `pending` or `running` task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] from any other
    /// status.
    pub fn cancel(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Canceled)?;
        self.status = TaskStatus::Canceled;
        self.touch(clock);
        Ok(())
    }

    /// Returns a `failed` or `canceled` task to `pending`, clearing the
    /// completion metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] from any other
    /// status.
    pub fn requeue(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        self.ensure_transition(TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.completed_at = None;
        self.completed_user_id = None;
        self.touch(clock);
        Ok(())
    }

    /// Returns a task interrupted by a process restart from `running` to
    /// `pending`.
    ///
    /// This edge exists only for startup recovery and is deliberately absent
    /// from [`TaskStatus::can_transition_to`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task is
    /// `running`.
    pub fn recover_interrupted(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid_transition(TaskStatus::Pending));
        }
        self.status = TaskStatus::Pending;
        self.touch(clock);
        Ok(())
    }

    /// Records advisory progress.
    pub fn set_progress(&mut self, progress: Progress, clock: &impl Clock) {
        self.progress = progress;
        self.touch(clock);
    }

    /// Sets the free-text message.
    pub fn set_msg(&mut self, msg: Option<String>, clock: &impl Clock) {
        self.msg = msg;
        self.touch(clock);
    }

    /// Appends a poll attempt and increments the poll counter.
    pub fn record_poll(&mut self, record: PollRecord, clock: &impl Clock) {
        self.poll_results.push(record);
        self.poll_count = self.poll_count.saturating_add(1);
        self.touch(clock);
    }

    fn ensure_transition(&self, target: TaskStatus) -> Result<(), TaskDomainError> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(self.invalid_transition(target))
        }
    }

    const fn invalid_transition(&self, target: TaskStatus) -> TaskDomainError {
        TaskDomainError::InvalidStateTransition {
            task_id: self.id,
            from: self.status,
            to: target,
        }
    }

    fn complete(&mut self, completed_by: Option<UserId>, clock: &impl Clock) {
        let timestamp = clock.utc();
        self.completed_at = Some(timestamp);
        self.completed_user_id = completed_by;
        self.updated_at = timestamp;
    }

    /// Updates the `updated_at` timestamp to the current clock time.
    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
