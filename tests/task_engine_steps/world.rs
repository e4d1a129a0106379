//! Shared world state for task engine BDD scenarios.

use crate::test_helpers::TestEngine;
use rstest::fixture;
use tasklane::config::EngineConfig;
use tasklane::task::{
    domain::Task,
    services::{ContinuationError, Tick},
};

/// Scenario world for task engine behaviour tests.
pub struct TaskEngineWorld {
    pub engine: Option<TestEngine>,
    pub tasks: Vec<Task>,
    pub in_flight: Vec<Tick>,
    pub last_resume: Option<Result<Task, ContinuationError>>,
}

impl TaskEngineWorld {
    /// Creates a world with no engine wired yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            engine: None,
            tasks: Vec::new(),
            in_flight: Vec::new(),
            last_resume: None,
        }
    }

    /// Wires a fresh engine, discarding any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be wired.
    pub fn wire(&mut self, config: EngineConfig) -> eyre::Result<()> {
        self.engine = Some(TestEngine::new(config)?);
        Ok(())
    }

    /// Returns the wired engine.
    ///
    /// # Errors
    ///
    /// Returns an error if no engine step has run.
    pub fn engine(&self) -> eyre::Result<&TestEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing engine in scenario world"))
    }

    /// Returns the single task the scenario created.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario created no task.
    pub fn task(&self) -> eyre::Result<&Task> {
        self.tasks
            .last()
            .ok_or_else(|| eyre::eyre!("missing created task in scenario world"))
    }
}

impl Default for TaskEngineWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> TaskEngineWorld {
    TaskEngineWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
