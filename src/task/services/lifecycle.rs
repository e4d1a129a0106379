//! Service layer for creating, inspecting and resolving tasks.

use super::registry::{HandlerRegistry, UnknownTaskType};
use crate::config::EngineConfig;
use crate::task::{
    domain::{
        ErrorReport, NewTask, PageRequest, RunnerType, Task, TaskDomainError, TaskId, TaskPage,
        TaskQuery, TaskSort, TaskStatus, TaskTarget, TaskType, UserId,
    },
    ports::{CallbackError, TaskStore, TaskStoreError},
};
use chrono::TimeDelta;
use mockable::Clock;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Request payload for creating a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTaskRequest {
    task_type: String,
    target_id: String,
    target_type: String,
    runner_type: RunnerType,
    script_name: Option<String>,
    input: Value,
    options: Value,
    delay: Duration,
    user_id: Option<UserId>,
}

impl CreateTaskRequest {
    /// Creates a request for a `manual` task with empty input and options.
    #[must_use]
    pub fn new(
        task_type: impl Into<String>,
        target_id: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            target_id: target_id.into(),
            target_type: target_type.into(),
            runner_type: RunnerType::Manual,
            script_name: None,
            input: json!({}),
            options: json!({}),
            delay: Duration::ZERO,
            user_id: None,
        }
    }

    /// Sets the runner type.
    #[must_use]
    pub const fn with_runner_type(mut self, runner_type: RunnerType) -> Self {
        self.runner_type = runner_type;
        self
    }

    /// Selects a handler variant other than the default.
    #[must_use]
    pub fn with_script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    /// Sets the handler input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Sets handler options.
    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Postpones the earliest dispatch time.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Records the creating user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Which tasks a cancel request applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    /// A single task.
    Id(TaskId),
    /// Every active task of `task_type` acting on `target`.
    Target {
        /// Target object.
        target: TaskTarget,
        /// Task type.
        task_type: TaskType,
    },
}

/// Operator resolution of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteTaskRequest {
    /// Task to resolve.
    pub id: TaskId,
    /// `success` completes the task; any other status fails it.
    pub status: TaskStatus,
    /// Result recorded and passed to the completion callback on success.
    pub output: Option<Value>,
    /// Error payload recorded on failure.
    pub error: Option<Value>,
    /// Optional message.
    pub msg: Option<String>,
    /// Resolving operator.
    pub user_id: Option<UserId>,
}

impl CompleteTaskRequest {
    /// Resolves `id` as successful with `output`.
    #[must_use]
    pub const fn success(id: TaskId, output: Value) -> Self {
        Self {
            id,
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            msg: None,
            user_id: None,
        }
    }

    /// Resolves `id` as failed with `error`.
    #[must_use]
    pub const fn failed(id: TaskId, error: Value) -> Self {
        Self {
            id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
            msg: None,
            user_id: None,
        }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Records the resolving operator.
    #[must_use]
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Which tasks a retry request applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    /// A single task; a refusal is an error.
    Id(TaskId),
    /// Several tasks, each retried or rejected independently.
    Batch(Vec<TaskId>),
}

/// Outcome of a retry request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Tasks moved back to `pending`.
    pub retried: Vec<TaskId>,
    /// Tasks that were missing or not in a retryable status.
    pub rejected: Vec<TaskId>,
}

/// Filter, page and ordering for [`TaskLifecycleService::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListTasksRequest {
    /// Row filter.
    pub filter: TaskQuery,
    /// Page selection; 20 rows of page one by default.
    pub page: PageRequest,
    /// Ordering; newest first by default.
    pub sort: TaskSort,
}

/// Service-level errors for task lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum TaskLifecycleError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
    /// The task type has no registered completion callback.
    #[error(transparent)]
    UnknownType(#[from] UnknownTaskType),
    /// The completion callback failed; the task is now `failed`.
    #[error(transparent)]
    Callback(#[from] CallbackError),
    /// No task has the requested id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The task's status is outside the retry policy.
    #[error("task {task_id} cannot be retried from {status}")]
    RetryNotPermitted {
        /// Requested task.
        task_id: TaskId,
        /// Its current status.
        status: TaskStatus,
    },
    /// The requested delay does not fit in a timestamp.
    #[error("task delay out of range: {0:?}")]
    InvalidDelay(Duration),
}

/// Result type for task lifecycle service operations.
pub type TaskLifecycleResult<T> = Result<T, TaskLifecycleError>;

/// Task lifecycle orchestration service.
pub struct TaskLifecycleService<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    registry: Arc<HandlerRegistry>,
    config: Arc<EngineConfig>,
}

impl<S, C> Clone for TaskLifecycleService<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, C> TaskLifecycleService<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a new task lifecycle service.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        clock: Arc<C>,
        registry: Arc<HandlerRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            config,
        }
    }

    /// Creates a `pending` task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::UnknownType`] before any write when the
    /// type has no completion callback, and [`TaskLifecycleError::Domain`]
    /// for blank type or target fields.
    pub async fn create(&self, request: CreateTaskRequest) -> TaskLifecycleResult<Task> {
        let task_type = TaskType::new(request.task_type)?;
        self.registry.ensure_registered(&task_type)?;
        let target = TaskTarget::new(request.target_id, request.target_type)?;

        let now = self.clock.utc();
        let start_time = TimeDelta::from_std(request.delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or(TaskLifecycleError::InvalidDelay(request.delay))?;

        let task = Task::new(
            NewTask {
                task_type,
                script_name: request.script_name,
                target,
                runner_type: request.runner_type,
                start_time,
                input: request.input,
                options: request.options,
                user_id: request.user_id,
            },
            &*self.clock,
        );
        self.store.store(&task).await?;
        info!(
            task_id = %task.id(),
            task_type = %task.task_type(),
            runner_type = %task.runner_type(),
            "task created"
        );
        Ok(task)
    }

    /// Returns a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::NotFound`] for an unknown id.
    pub async fn detail(&self, id: TaskId) -> TaskLifecycleResult<Task> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(TaskLifecycleError::NotFound(id))
    }

    /// Cancels `pending` and `running` tasks, returning how many changed.
    ///
    /// Tasks in any other status are left untouched. A running handler is
    /// not interrupted; its result is discarded when it settles.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::NotFound`] for an unknown id.
    pub async fn cancel(&self, scope: CancelTarget) -> TaskLifecycleResult<u64> {
        let candidates = match scope {
            CancelTarget::Id(id) => vec![self.detail(id).await?],
            CancelTarget::Target { target, task_type } => {
                let query = TaskQuery::new()
                    .with_target_id(target.id())
                    .with_target_type(target.kind())
                    .with_task_type(task_type)
                    .with_statuses([TaskStatus::Pending, TaskStatus::Running]);
                self.store.find(&query, None, TaskSort::oldest_first()).await?
            }
        };

        let mut canceled = 0;
        for task in candidates {
            if self.cancel_one(task).await? {
                canceled += 1;
            }
        }
        Ok(canceled)
    }

    /// Cancels one task, re-reading it when another writer moved it first.
    async fn cancel_one(&self, candidate: Task) -> TaskLifecycleResult<bool> {
        let mut task = candidate;
        loop {
            let observed = task.status();
            if !observed.is_cancelable() {
                return Ok(false);
            }
            task.cancel(&*self.clock)?;
            match self.store.update_if(&task, observed).await {
                Ok(()) => {
                    info!(task_id = %task.id(), "task canceled");
                    return Ok(true);
                }
                Err(TaskStoreError::StatusConflict { .. }) => {
                    let Some(current) = self.store.find_by_id(task.id()).await? else {
                        return Ok(false);
                    };
                    task = current;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Resolves a task on an operator's behalf.
    ///
    /// A `pending` task is claimed first so that it follows the normal
    /// `running` edges. A `success` resolution runs the completion callback
    /// with the supplied output before the task is marked successful.
    ///
    /// # Errors
    ///
    /// - [`TaskLifecycleError::NotFound`] for an unknown id;
    /// - [`TaskLifecycleError::Domain`] for tasks already in a terminal
    ///   status;
    /// - [`TaskLifecycleError::Callback`] after marking the task `failed`
    ///   when the callback rejects the output;
    /// - [`TaskLifecycleError::Store`] with [`TaskStoreError::StatusConflict`]
    ///   when another writer settled the task first.
    pub async fn complete(&self, request: CompleteTaskRequest) -> TaskLifecycleResult<Task> {
        let CompleteTaskRequest {
            id,
            status,
            output,
            error,
            msg,
            user_id,
        } = request;
        let mut task = self.detail(id).await?;
        let resolution = if status == TaskStatus::Success {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        if task.status().is_terminal() {
            return Err(TaskDomainError::InvalidStateTransition {
                task_id: id,
                from: task.status(),
                to: resolution,
            }
            .into());
        }
        if task.status() == TaskStatus::Pending {
            task.start(&*self.clock)?;
            self.store.update_if(&task, TaskStatus::Pending).await?;
        }
        let claimed = task.status();

        if resolution == TaskStatus::Success {
            let result = output.unwrap_or(Value::Null);
            let callback = self.registry.callback(task.task_type())?;
            if let Err(err) = callback
                .on_complete(&task, &result, Some(task.context()))
                .await
            {
                warn!(task_id = %id, error = %err, "completion callback rejected manual result");
                task.fail(ErrorReport::from_error(&err).into_value(), user_id, &*self.clock)?;
                self.store.update_if(&task, claimed).await?;
                return Err(TaskLifecycleError::Callback(err));
            }
            task.succeed(result, user_id, &*self.clock)?;
        } else {
            let report = error.unwrap_or_else(|| {
                ErrorReport::from_message(msg.as_deref().unwrap_or("resolved as failed by operator"))
                    .into_value()
            });
            task.fail(report, user_id, &*self.clock)?;
        }
        if msg.is_some() {
            task.set_msg(msg, &*self.clock);
        }
        self.store.update_if(&task, claimed).await?;
        info!(task_id = %id, status = %task.status(), "task resolved manually");
        Ok(task)
    }

    /// Returns `failed` or `canceled` tasks to `pending`, as allowed by
    /// [`EngineConfig::retry_policy`].
    ///
    /// # Errors
    ///
    /// For [`RetryTarget::Id`], returns [`TaskLifecycleError::NotFound`] or
    /// [`TaskLifecycleError::RetryNotPermitted`] without changing the task.
    /// Batch requests report refusals in [`RetryReport::rejected`] and only
    /// fail on store errors.
    pub async fn retry(&self, scope: RetryTarget) -> TaskLifecycleResult<RetryReport> {
        let mut report = RetryReport::default();
        match scope {
            RetryTarget::Id(id) => {
                let task = self.detail(id).await?;
                if !self.config.retry_policy.permits(task.status()) {
                    return Err(TaskLifecycleError::RetryNotPermitted {
                        task_id: id,
                        status: task.status(),
                    });
                }
                self.requeue(task).await?;
                report.retried.push(id);
            }
            RetryTarget::Batch(ids) => {
                for id in ids {
                    match self.store.find_by_id(id).await? {
                        Some(task) if self.config.retry_policy.permits(task.status()) => {
                            self.requeue(task).await?;
                            report.retried.push(id);
                        }
                        _ => report.rejected.push(id),
                    }
                }
            }
        }
        Ok(report)
    }

    async fn requeue(&self, mut task: Task) -> TaskLifecycleResult<()> {
        let observed = task.status();
        task.requeue(&*self.clock)?;
        self.store.update_if(&task, observed).await?;
        info!(task_id = %task.id(), "task queued for retry");
        Ok(())
    }

    /// Returns one page of tasks with the total match count.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::Store`] when the lookup fails.
    pub async fn list(&self, request: ListTasksRequest) -> TaskLifecycleResult<TaskPage> {
        Ok(self
            .store
            .find_page(&request.filter, request.page, request.sort)
            .await?)
    }

    /// Returns every `running` task to `pending`. Intended for process
    /// startup, when no handler can still be running.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::Store`] when the lookup or an update
    /// fails.
    pub async fn reset_all(&self) -> TaskLifecycleResult<u64> {
        let running = self
            .store
            .find(
                &TaskQuery::new().with_status(TaskStatus::Running),
                None,
                TaskSort::oldest_first(),
            )
            .await?;

        let mut reset = 0;
        for mut task in running {
            task.recover_interrupted(&*self.clock)?;
            match self.store.update_if(&task, TaskStatus::Running).await {
                Ok(()) => reset += 1,
                Err(TaskStoreError::StatusConflict { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        if reset > 0 {
            info!(count = reset, "interrupted tasks returned to pending");
        }
        Ok(reset)
    }
}
