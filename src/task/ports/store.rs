//! Store port for task persistence and filtered lookup.

use crate::task::domain::{PageRequest, Task, TaskId, TaskPage, TaskQuery, TaskSort, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Task persistence contract.
///
/// The store is the single source of truth for task records; callers hold
/// only transient copies for the duration of one operation.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::DuplicateTask`] when the task ID already
    /// exists.
    async fn store(&self, task: &Task) -> TaskStoreResult<()>;

    /// Persists the full state of an existing task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] when the task does not exist.
    async fn update(&self, task: &Task) -> TaskStoreResult<()>;

    /// Persists the full state of an existing task only while the stored
    /// record is still in `expected` status.
    ///
    /// The status check and the write happen atomically, so a concurrent
    /// transition committed after the caller loaded its copy is never
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] when the task does not exist and
    /// [`TaskStoreError::StatusConflict`] when its stored status differs
    /// from `expected`.
    async fn update_if(&self, task: &Task, expected: TaskStatus) -> TaskStoreResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>>;

    /// Returns tasks matching `query` in `sort` order, at most `limit` of them.
    async fn find(
        &self,
        query: &TaskQuery,
        limit: Option<usize>,
        sort: TaskSort,
    ) -> TaskStoreResult<Vec<Task>>;

    /// Counts tasks matching `query`.
    async fn count(&self, query: &TaskQuery) -> TaskStoreResult<u64>;

    /// Returns one page of tasks matching `query` together with the total
    /// number of matches.
    async fn find_page(
        &self,
        query: &TaskQuery,
        page: PageRequest,
        sort: TaskSort,
    ) -> TaskStoreResult<TaskPage>;
}

/// Errors returned by task store implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The stored status changed since the caller loaded the task.
    #[error("task {task_id} is {actual}, expected {expected}")]
    StatusConflict {
        /// Conflicting task.
        task_id: TaskId,
        /// Status the write was conditioned on.
        expected: TaskStatus,
        /// Status found in the store.
        actual: TaskStatus,
    },

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskStoreError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
