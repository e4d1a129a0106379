//! Engine wiring shared by the integration and behaviour tests.
//!
//! The `export` task type is registered with two handler variants: the
//! default script renders a report once its gate opens, and the `await`
//! script suspends with the `secret` found in the task input.

use async_trait::async_trait;
use mockable::DefaultClock;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tasklane::config::EngineConfig;
use tasklane::task::{
    adapters::memory::InMemoryTaskStore,
    domain::{CONTINUATION_SECRET_KEY, Task, TaskId, TaskType},
    ports::{
        CallbackError, CompletionCallback, ExecutionContext, HandlerOutcome, HandlerResult,
        TaskHandler, TaskStore,
    },
    services::{ContinuationResolver, HandlerRegistry, Scheduler, TaskLifecycleService},
};
use tokio::sync::Semaphore;

/// Task type registered by [`TestEngine`].
pub const EXPORT: &str = "export";

/// Script name of the suspending handler variant.
pub const AWAIT_SCRIPT: &str = "await";

/// Renders a report once its gate opens, reporting progress on the way.
pub struct ExportHandler {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TaskHandler for ExportHandler {
    async fn run(
        &self,
        task: &Task,
        _config: &EngineConfig,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        drop(self.gate.acquire().await);
        ctx.report_progress(50).await;
        let format = task.input().get("format").cloned().unwrap_or(Value::Null);
        Ok(HandlerOutcome::completed(json!({"ok": true, "format": format})))
    }
}

/// Suspends the task until an external continuation arrives.
pub struct AwaitHandler;

#[async_trait]
impl TaskHandler for AwaitHandler {
    async fn run(
        &self,
        task: &Task,
        _config: &EngineConfig,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        let mut context = json!({"target": task.target().to_string()});
        if let (Some(secret), Some(fields)) = (
            task.input().get(CONTINUATION_SECRET_KEY),
            context.as_object_mut(),
        ) {
            fields.insert(CONTINUATION_SECRET_KEY.to_owned(), secret.clone());
        }
        Ok(ctx.suspend(context).await?)
    }
}

/// Records every result applied to the export target.
#[derive(Default)]
pub struct ExportCallback {
    applied: Mutex<Vec<(TaskId, Value)>>,
}

impl ExportCallback {
    /// Returns the results applied so far.
    pub fn applied(&self) -> Vec<(TaskId, Value)> {
        self.applied.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionCallback for ExportCallback {
    async fn on_complete(
        &self,
        task: &Task,
        result: &Value,
        _context: Option<&Value>,
    ) -> Result<(), CallbackError> {
        self.applied
            .lock()
            .map_err(|_| CallbackError::failed("callback log poisoned"))?
            .push((task.id(), result.clone()));
        Ok(())
    }
}

/// Service type aliases over the in-memory store.
pub type TestLifecycle = TaskLifecycleService<InMemoryTaskStore, DefaultClock>;
/// Scheduler over the in-memory store.
pub type TestScheduler = Scheduler<InMemoryTaskStore, DefaultClock>;
/// Continuation resolver over the in-memory store.
pub type TestResolver = ContinuationResolver<InMemoryTaskStore, DefaultClock>;

/// A wired engine over a fresh in-memory store.
pub struct TestEngine {
    pub store: Arc<InMemoryTaskStore>,
    pub callback: Arc<ExportCallback>,
    pub gate: Arc<Semaphore>,
    pub lifecycle: TestLifecycle,
    pub scheduler: Arc<TestScheduler>,
    pub resolver: TestResolver,
}

impl TestEngine {
    /// Wires an engine with the export gate closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler registry rejects the registrations.
    pub fn new(config: EngineConfig) -> eyre::Result<Self> {
        let export = TaskType::new(EXPORT)?;
        let gate = Arc::new(Semaphore::new(0));
        let callback = Arc::new(ExportCallback::default());
        let registry = Arc::new(
            HandlerRegistry::builder(&config)
                .on_complete(
                    export.clone(),
                    Arc::clone(&callback) as Arc<dyn CompletionCallback>,
                )
                .default_handler(
                    export.clone(),
                    Arc::new(ExportHandler {
                        gate: Arc::clone(&gate),
                    }),
                )
                .handler(export, AWAIT_SCRIPT, Arc::new(AwaitHandler))
                .build()?,
        );
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(DefaultClock);
        let shared_config = Arc::new(config);

        Ok(Self {
            lifecycle: TaskLifecycleService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&registry),
                Arc::clone(&shared_config),
            ),
            scheduler: Arc::new(Scheduler::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&registry),
                shared_config,
            )),
            resolver: ContinuationResolver::new(Arc::clone(&store), clock, registry),
            store,
            callback,
            gate,
        })
    }

    /// Lets every blocked and future export handler finish.
    pub fn open_gate(&self) {
        self.gate.add_permits(1);
    }

    /// Loads a task straight from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the task does not exist.
    pub async fn reload(&self, id: TaskId) -> eyre::Result<Task> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| eyre::eyre!("task {id} not found"))
    }
}
