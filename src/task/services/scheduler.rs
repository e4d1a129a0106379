//! Periodic dispatcher for `system` tasks.

use super::dispatch::{DispatchStart, TaskDispatcher};
use super::registry::HandlerRegistry;
use crate::config::EngineConfig;
use crate::task::{
    domain::{RunnerType, Task, TaskDomainError, TaskId, TaskQuery, TaskSort, TaskStatus},
    ports::{TaskStore, TaskStoreError},
};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Errors returned by scheduler operations.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The task cannot be dispatched from its current status.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Counters describing a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// `system` tasks already running when the tick started.
    pub running: u64,
    /// Free slots under the concurrency limit.
    pub available: u64,
    /// Eligible `system` tasks waiting for a slot, selected or not.
    pub eligible: u64,
    /// Tasks whose handler was started.
    pub dispatched: usize,
    /// Tasks failed during the tick because no handler matched.
    pub resolution_failures: usize,
    /// Tasks skipped because the store or the state machine rejected them.
    pub skipped: usize,
}

/// Result of [`Scheduler::tick`].
///
/// Handlers keep running after the tick returns. Dropping a `Tick` detaches
/// them; [`Tick::settled`] waits for every one of them to settle.
#[derive(Debug)]
pub struct Tick {
    /// Tick counters.
    pub report: TickReport,
    handles: Vec<JoinHandle<()>>,
}

impl Tick {
    /// Waits until every handler started by this tick has settled.
    pub async fn settled(self) -> TickReport {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "task settlement did not complete");
            }
        }
        self.report
    }
}

/// Selects eligible `system` tasks and dispatches them under the
/// concurrency limit.
pub struct Scheduler<S, C>
where
    S: TaskStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
{
    store: Arc<S>,
    clock: Arc<C>,
    config: Arc<EngineConfig>,
    dispatcher: TaskDispatcher<S, C>,
}

impl<S, C> Scheduler<S, C>
where
    S: TaskStore + ?Sized + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<C>,
        registry: Arc<HandlerRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            registry,
            Arc::clone(&config),
        );
        Self {
            store,
            clock,
            config,
            dispatcher,
        }
    }

    /// Runs one scheduling pass.
    ///
    /// The running-task count and the dispatch are separate store calls, so
    /// the limit is best-effort when several schedulers share a store.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] when counting or selecting tasks
    /// fails. Per-task dispatch failures are logged and counted as skipped.
    pub async fn tick(&self) -> Result<Tick, SchedulerError> {
        let running_query = TaskQuery::new()
            .with_status(TaskStatus::Running)
            .with_runner_type(RunnerType::System);
        let running = self.store.count(&running_query).await?;
        let limit = u64::try_from(self.config.concurrency_limit).unwrap_or(u64::MAX);
        let available = limit.saturating_sub(running);

        let mut report = TickReport {
            running,
            available,
            ..TickReport::default()
        };
        if available == 0 {
            info!(running, limit, "concurrency limit reached, skipping tick");
            return Ok(Tick {
                report,
                handles: Vec::new(),
            });
        }

        let eligible_query = TaskQuery::new()
            .with_status(TaskStatus::Pending)
            .with_runner_type(RunnerType::System)
            .with_start_time_lte(self.clock.utc());
        let batch = usize::try_from(available).unwrap_or(usize::MAX);
        let selected = self
            .store
            .find(&eligible_query, Some(batch), TaskSort::oldest_first())
            .await?;
        report.eligible = self.store.count(&eligible_query).await?;
        info!(
            running,
            available,
            eligible = report.eligible,
            selected = selected.len(),
            "scheduler tick"
        );

        let mut handles = Vec::with_capacity(selected.len());
        for task in selected {
            match self.dispatcher.dispatch(task.id()).await {
                Ok(DispatchStart::Spawned(handle)) => {
                    report.dispatched += 1;
                    handles.push(handle);
                }
                Ok(DispatchStart::ResolutionFailed) => report.resolution_failures += 1,
                Err(err) => {
                    warn!(task_id = %task.id(), error = %err, "skipping task dispatch");
                    report.skipped += 1;
                }
            }
        }

        Ok(Tick { report, handles })
    }

    /// Dispatches a single `pending` task immediately, regardless of runner
    /// type, start time or the concurrency limit, and waits for it to settle.
    ///
    /// Returns the task as stored after settlement.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] with [`TaskStoreError::NotFound`]
    /// for an unknown id and [`SchedulerError::Domain`] when the task is not
    /// `pending`.
    pub async fn run_now(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        if let DispatchStart::Spawned(handle) = self.dispatcher.dispatch(task_id).await? {
            if let Err(err) = handle.await {
                error!(task_id = %task_id, error = %err, "task settlement did not complete");
            }
        }
        self.store
            .find_by_id(task_id)
            .await?
            .ok_or(SchedulerError::Store(TaskStoreError::NotFound(task_id)))
    }

    /// Drives [`Scheduler::tick`] every [`EngineConfig::tick_interval`] on a
    /// background tokio task. Tick errors are logged and the loop continues.
    #[must_use]
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.tick_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                match self.tick().await {
                    Ok(tick) => drop(tick),
                    Err(err) => error!(error = %err, "scheduler tick failed"),
                }
            }
        })
    }
}
