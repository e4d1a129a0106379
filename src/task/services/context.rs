//! Per-dispatch execution context bound to one task.

use super::polling::{PollRecorder, poll_until};
use crate::config::EngineConfig;
use crate::task::{
    domain::{PollRecord, PollResponse, Progress, Task, TaskId, TaskStatus},
    ports::{
        ExecutionContext, ExecutionContextError, HandlerOutcome, PollError, PollOptions,
        PollProbe, Suspension, TaskStore, TaskStoreError, TaskStoreResult,
    },
};
use async_trait::async_trait;
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// [`ExecutionContext`] persisting every capability call on the task record.
///
/// Built once per dispatch and dropped after settlement; it holds no task
/// state of its own beyond the identifier.
pub struct TaskExecutionContext<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    task_id: TaskId,
    store: Arc<S>,
    clock: Arc<C>,
    config: Arc<EngineConfig>,
    poll_guard: Mutex<()>,
}

impl<S, C> TaskExecutionContext<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    /// Binds a context to `task_id`.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        store: Arc<S>,
        clock: Arc<C>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            task_id,
            store,
            clock,
            config,
            poll_guard: Mutex::new(()),
        }
    }

    async fn load(&self) -> TaskStoreResult<Task> {
        self.store
            .find_by_id(self.task_id)
            .await?
            .ok_or(TaskStoreError::NotFound(self.task_id))
    }

    /// Returns whether the progress was written; a task that has left
    /// `running`, even between the load and the write, keeps its record.
    async fn store_progress(&self, progress: Progress) -> TaskStoreResult<bool> {
        let mut task = self.load().await?;
        if task.status() != TaskStatus::Running {
            return Ok(false);
        }
        task.set_progress(progress, &*self.clock);
        match self.store.update_if(&task, TaskStatus::Running).await {
            Ok(()) => Ok(true),
            Err(TaskStoreError::StatusConflict { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<S, C> ExecutionContext for TaskExecutionContext<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    async fn report_progress(&self, progress: u8) {
        let value = Progress::new(progress);
        match self.store_progress(value).await {
            Ok(true) => debug!(task_id = %self.task_id, %value, "task progress recorded"),
            Ok(false) => debug!(task_id = %self.task_id, "progress ignored for settled task"),
            Err(err) => warn!(
                task_id = %self.task_id,
                error = %err,
                "failed to record task progress"
            ),
        }
    }

    async fn poll(
        &self,
        probe: &mut dyn PollProbe,
        options: PollOptions,
    ) -> Result<Value, PollError> {
        let Ok(_guard) = self.poll_guard.try_lock() else {
            return Err(PollError::AlreadyPolling(self.task_id));
        };
        let (max_attempts, interval) = options.resolve(&self.config);
        debug!(
            task_id = %self.task_id,
            max_attempts,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "poll loop started"
        );
        poll_until(probe, max_attempts, interval, self).await
    }

    async fn suspend(&self, context: Value) -> Result<HandlerOutcome, ExecutionContextError> {
        let mut task = self.load().await?;
        task.suspend(context, &*self.clock)?;
        self.store.update_if(&task, TaskStatus::Running).await?;
        debug!(task_id = %self.task_id, "task suspended awaiting continuation");
        Ok(HandlerOutcome::Suspended(Suspension::new(self.task_id)))
    }
}

#[async_trait]
impl<S, C> PollRecorder for TaskExecutionContext<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    async fn record(&self, attempt: u32, response: &PollResponse) -> TaskStoreResult<()> {
        let mut task = self.load().await?;
        let record = PollRecord::from_response(attempt, self.clock.utc(), response);
        task.record_poll(record, &*self.clock);
        if let Some(progress) = response.progress {
            task.set_progress(Progress::new(progress), &*self.clock);
        }
        self.store.update_if(&task, TaskStatus::Running).await
    }
}
