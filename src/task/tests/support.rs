//! Handlers, callbacks and an engine harness shared by the unit tests.

use crate::config::EngineConfig;
use crate::task::{
    adapters::memory::InMemoryTaskStore,
    domain::{NewTask, PollResponse, RunnerType, Task, TaskId, TaskTarget, TaskType},
    ports::{
        CallbackError, CompletionCallback, ExecutionContext, HandlerError, HandlerOutcome,
        HandlerResult, PollOptions, ProbeError, TaskHandler, TaskStore,
    },
    services::{
        ContinuationResolver, CreateTaskRequest, HandlerRegistry, Scheduler, TaskLifecycleService,
    },
};
use async_trait::async_trait;
use mockable::DefaultClock;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub(super) const EXPORT: &str = "export";

pub(super) fn export_type() -> TaskType {
    TaskType::new(EXPORT).expect("valid task type")
}

pub(super) fn report_target() -> TaskTarget {
    TaskTarget::new("42", "report").expect("valid target")
}

/// Builds an unsaved `pending` export task.
pub(super) fn new_export_task(runner_type: RunnerType) -> Task {
    Task::new(
        NewTask {
            task_type: export_type(),
            script_name: None,
            target: report_target(),
            runner_type,
            start_time: chrono::Utc::now(),
            input: json!({"format": "csv"}),
            options: json!({}),
            user_id: None,
        },
        &DefaultClock,
    )
}

/// One recorded completion callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct CallbackCall {
    pub(super) task_id: TaskId,
    pub(super) result: Value,
    pub(super) context: Option<Value>,
}

/// Entry signal and release gate for a callback held mid-invocation.
#[derive(Debug)]
pub(super) struct CallbackGate {
    pub(super) entered: Arc<Semaphore>,
    pub(super) release: Arc<Semaphore>,
}

#[derive(Debug, Default)]
pub(super) struct RecordingCallback {
    calls: Mutex<Vec<CallbackCall>>,
    fail_with: Option<String>,
    gate: Option<CallbackGate>,
}

impl RecordingCallback {
    pub(super) fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_owned()),
            ..Self::default()
        }
    }

    /// A callback that signals `entered` and then waits for `release`.
    pub(super) fn held() -> (Self, Arc<Semaphore>, Arc<Semaphore>) {
        let entered = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));
        let callback = Self {
            gate: Some(CallbackGate {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
            ..Self::default()
        };
        (callback, entered, release)
    }

    pub(super) fn calls(&self) -> Vec<CallbackCall> {
        self.calls.lock().expect("callback lock").clone()
    }
}

#[async_trait]
impl CompletionCallback for RecordingCallback {
    async fn on_complete(
        &self,
        task: &Task,
        result: &Value,
        context: Option<&Value>,
    ) -> Result<(), CallbackError> {
        self.calls.lock().expect("callback lock").push(CallbackCall {
            task_id: task.id(),
            result: result.clone(),
            context: context.cloned(),
        });
        if let Some(gate) = &self.gate {
            gate.entered.add_permits(1);
            drop(gate.release.acquire().await);
        }
        match &self.fail_with {
            Some(message) => Err(CallbackError::failed(message.clone())),
            None => Ok(()),
        }
    }
}

/// Completes with a fixed value.
pub(super) struct ReturningHandler(pub(super) Value);

#[async_trait]
impl TaskHandler for ReturningHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        Ok(HandlerOutcome::completed(self.0.clone()))
    }
}

/// Waits for the gate to open, then completes with a fixed value.
///
/// The gate starts closed; adding a single permit lets every waiting
/// handler through in turn.
pub(super) struct GatedHandler {
    pub(super) gate: Arc<Semaphore>,
    pub(super) output: Value,
}

impl GatedHandler {
    pub(super) fn closed(output: Value) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Arc::clone(&gate),
                output,
            },
            gate,
        )
    }
}

#[async_trait]
impl TaskHandler for GatedHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        drop(self.gate.acquire().await);
        Ok(HandlerOutcome::completed(self.output.clone()))
    }
}

/// Fails with the given error.
pub(super) struct FailingHandler(pub(super) HandlerError);

#[async_trait]
impl TaskHandler for FailingHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        Err(self.0.clone())
    }
}

pub(super) struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        panic!("boom");
    }
}

/// Suspends with the given context.
pub(super) struct SuspendingHandler(pub(super) Value);

#[async_trait]
impl TaskHandler for SuspendingHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        Ok(ctx.suspend(self.0.clone()).await?)
    }
}

/// Reports progress, then polls a scripted probe and completes with its data.
pub(super) struct PollingHandler {
    pub(super) responses: Arc<Mutex<VecDeque<PollResponse>>>,
}

impl PollingHandler {
    pub(super) fn new(responses: impl IntoIterator<Item = PollResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
        }
    }
}

#[async_trait]
impl TaskHandler for PollingHandler {
    async fn run(
        &self,
        _task: &Task,
        _config: &EngineConfig,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        ctx.report_progress(10).await;
        let responses = Arc::clone(&self.responses);
        let mut probe = move || {
            let next = responses
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(PollResponse::pending);
            async move { Ok::<_, ProbeError>(next) }
        };
        let options = PollOptions::default()
            .with_max_attempts(5)
            .with_interval(Duration::from_millis(1));
        let data = ctx.poll(&mut probe, options).await?;
        Ok(HandlerOutcome::completed(data))
    }
}

pub(super) type TestStore = InMemoryTaskStore;
pub(super) type TestLifecycle = TaskLifecycleService<TestStore, DefaultClock>;
pub(super) type TestScheduler = Scheduler<TestStore, DefaultClock>;
pub(super) type TestResolver = ContinuationResolver<TestStore, DefaultClock>;

/// A fully wired engine over an in-memory store.
pub(super) struct Engine {
    pub(super) store: Arc<TestStore>,
    pub(super) callback: Arc<RecordingCallback>,
    pub(super) lifecycle: TestLifecycle,
    pub(super) scheduler: TestScheduler,
    pub(super) resolver: TestResolver,
}

impl Engine {
    /// Wires an engine whose `export` type uses `handler` as its default
    /// script.
    pub(super) fn with_handler(handler: impl TaskHandler + 'static) -> Self {
        Self::build(
            EngineConfig::default(),
            handler,
            RecordingCallback::default(),
        )
    }

    pub(super) fn build(
        config: EngineConfig,
        handler: impl TaskHandler + 'static,
        callback: RecordingCallback,
    ) -> Self {
        let callback = Arc::new(callback);
        let registry = Arc::new(
            HandlerRegistry::builder(&config)
                .on_complete(export_type(), Arc::clone(&callback) as Arc<dyn CompletionCallback>)
                .default_handler(export_type(), Arc::new(handler))
                .build()
                .expect("registry should build"),
        );
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(DefaultClock);
        let config = Arc::new(config);
        Self {
            lifecycle: TaskLifecycleService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&registry),
                Arc::clone(&config),
            ),
            scheduler: Scheduler::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&registry),
                Arc::clone(&config),
            ),
            resolver: ContinuationResolver::new(Arc::clone(&store), clock, registry),
            store,
            callback,
        }
    }

    pub(super) async fn create(&self, runner_type: RunnerType) -> Task {
        self.lifecycle
            .create(CreateTaskRequest::new(EXPORT, "42", "report").with_runner_type(runner_type))
            .await
            .expect("task creation should succeed")
    }

    pub(super) async fn reload(&self, id: TaskId) -> Task {
        self.store
            .find_by_id(id)
            .await
            .expect("lookup should succeed")
            .expect("task should exist")
    }
}
