//! Handler dispatch and settlement.

use super::context::TaskExecutionContext;
use super::registry::HandlerRegistry;
use super::scheduler::SchedulerError;
use crate::config::EngineConfig;
use crate::task::{
    domain::{ErrorReport, Task, TaskId, TaskStatus},
    ports::{HandlerOutcome, HandlerResult, TaskHandler, TaskStore, TaskStoreError},
};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// How a dispatch attempt ended within the caller's turn.
#[derive(Debug)]
pub(crate) enum DispatchStart {
    /// The handler is running; the handle resolves once the task is settled.
    Spawned(JoinHandle<()>),
    /// No handler matched; the task was marked `failed` immediately.
    ResolutionFailed,
}

/// Claims a pending task, resolves its handler and settles the outcome.
pub(crate) struct TaskDispatcher<S, C>
where
    S: TaskStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
{
    store: Arc<S>,
    clock: Arc<C>,
    registry: Arc<HandlerRegistry>,
    config: Arc<EngineConfig>,
}

impl<S, C> Clone for TaskDispatcher<S, C>
where
    S: TaskStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
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

impl<S, C> TaskDispatcher<S, C>
where
    S: TaskStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
{
    pub(crate) const fn new(
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

    /// Moves the task to `running` and starts its handler on a separate
    /// tokio task.
    ///
    /// A task that has no handler is failed in place rather than returned as
    /// an error, so one misconfigured type cannot stall its siblings.
    pub(crate) async fn dispatch(&self, task_id: TaskId) -> Result<DispatchStart, SchedulerError> {
        let mut task = self
            .store
            .find_by_id(task_id)
            .await?
            .ok_or(TaskStoreError::NotFound(task_id))?;
        task.start(&*self.clock)?;
        self.store.update_if(&task, TaskStatus::Pending).await?;
        info!(
            task_id = %task.id(),
            task_type = %task.task_type(),
            target = %task.target(),
            "task dispatched"
        );

        let handler = match self.registry.resolve(task.task_type(), task.script_name()) {
            Ok(handler) => handler,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "handler resolution failed");
                self.record_failure(task, ErrorReport::from_error(&err))
                    .await?;
                return Ok(DispatchStart::ResolutionFailed);
            }
        };

        let dispatcher = self.clone();
        Ok(DispatchStart::Spawned(tokio::spawn(async move {
            dispatcher.execute(task, handler).await;
        })))
    }

    async fn execute(self, snapshot: Task, handler: Arc<dyn TaskHandler>) {
        let task_id = snapshot.id();
        let ctx = TaskExecutionContext::new(
            task_id,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.config),
        );
        let config = Arc::clone(&self.config);
        let run = tokio::spawn(async move { handler.run(&snapshot, &config, &ctx).await }).await;

        if let Err(err) = self.settle(task_id, run).await {
            error!(task_id = %task_id, error = %err, "failed to settle task");
        }
    }

    async fn settle(
        &self,
        task_id: TaskId,
        run: Result<HandlerResult, JoinError>,
    ) -> Result<(), SchedulerError> {
        let suspended = matches!(run, Ok(Ok(HandlerOutcome::Suspended(_))));
        let Some(task) = self.reload_running(task_id, suspended).await? else {
            return Ok(());
        };

        match run {
            Ok(Ok(HandlerOutcome::Completed(value))) => self.complete(task, value).await,
            Ok(Ok(HandlerOutcome::Suspended(suspension))) => {
                warn!(
                    task_id = %suspension.task_id(),
                    "suspended handler returned while its task is running"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(task_id = %task_id, error = %err, "task handler failed");
                self.record_failure(task, ErrorReport::from_error(&err))
                    .await
            }
            Err(join_err) => {
                let message = panic_message(join_err);
                warn!(task_id = %task_id, %message, "task handler did not return");
                self.record_failure(task, ErrorReport::from_message(message))
                    .await
            }
        }
    }

    /// Reloads the task, returning `None` when it has left `running` since
    /// dispatch and the handler result must be discarded.
    async fn reload_running(
        &self,
        task_id: TaskId,
        suspended: bool,
    ) -> Result<Option<Task>, SchedulerError> {
        let Some(task) = self.store.find_by_id(task_id).await? else {
            warn!(task_id = %task_id, "task disappeared before settlement");
            return Ok(None);
        };
        if task.status() == TaskStatus::Running {
            return Ok(Some(task));
        }
        if suspended {
            debug!(task_id = %task_id, status = %task.status(), "task left running by suspending");
        } else {
            info!(
                task_id = %task_id,
                status = %task.status(),
                "discarding handler result for task no longer running"
            );
        }
        Ok(None)
    }

    async fn complete(&self, task: Task, value: Value) -> Result<(), SchedulerError> {
        let callback = match self.registry.callback(task.task_type()) {
            Ok(callback) => callback,
            Err(err) => return self.record_failure(task, ErrorReport::from_error(&err)).await,
        };
        if let Err(err) = callback.on_complete(&task, &value, None).await {
            warn!(task_id = %task.id(), error = %err, "completion callback failed");
            return self.record_failure(task, ErrorReport::from_error(&err)).await;
        }

        let Some(mut current) = self.reload_running(task.id(), false).await? else {
            return Ok(());
        };
        current.succeed(value, None, &*self.clock)?;
        if !self.write_settled(&current).await? {
            return Ok(());
        }
        info!(
            task_id = %current.id(),
            task_type = %current.task_type(),
            "task succeeded"
        );
        Ok(())
    }

    /// Writes a settled task unless it left `running` after it was loaded,
    /// returning whether the write happened.
    async fn write_settled(&self, task: &Task) -> Result<bool, SchedulerError> {
        match self.store.update_if(task, TaskStatus::Running).await {
            Ok(()) => Ok(true),
            Err(TaskStoreError::StatusConflict { actual, .. }) => {
                info!(
                    task_id = %task.id(),
                    status = %actual,
                    "discarding handler result for task no longer running"
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn record_failure(&self, mut task: Task, report: ErrorReport) -> Result<(), SchedulerError> {
        task.fail(report.into_value(), None, &*self.clock)?;
        if !self.write_settled(&task).await? {
            return Ok(());
        }
        info!(
            task_id = %task.id(),
            task_type = %task.task_type(),
            "task failed"
        );
        Ok(())
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("handler task aborted: {err}");
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "handler panicked".to_owned(),
            |text| format!("handler panicked: {text}"),
        )
}
