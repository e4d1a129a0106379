//! In-memory task store for tests and embedded hosts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::task::{
    domain::{PageRequest, Task, TaskId, TaskPage, TaskQuery, TaskSort, TaskStatus},
    ports::{TaskStore, TaskStoreError, TaskStoreResult},
};

/// Thread-safe in-memory task store.
///
/// Records are kept in insertion order so equal sort keys resolve to
/// creation order, matching what a sequential primary key gives in SQL.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<InMemoryTaskState>>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl InMemoryTaskState {
    fn matching(&self, query: &TaskQuery, sort: TaskSort) -> Vec<&Task> {
        let mut rows: Vec<&Task> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|task| query.matches(task))
            .collect();
        rows.sort_by(|left, right| sort.compare(left, right));
        rows
    }
}

impl InMemoryTaskStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Persistence`] when the lock is poisoned.
    pub fn len(&self) -> TaskStoreResult<usize> {
        Ok(self.read()?.tasks.len())
    }

    /// Returns whether the store holds no tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Persistence`] when the lock is poisoned.
    pub fn is_empty(&self) -> TaskStoreResult<bool> {
        Ok(self.read()?.tasks.is_empty())
    }

    fn read(&self) -> TaskStoreResult<RwLockReadGuard<'_, InMemoryTaskState>> {
        self.state
            .read()
            .map_err(|err| TaskStoreError::persistence(std::io::Error::other(err.to_string())))
    }

    fn write(&self) -> TaskStoreResult<RwLockWriteGuard<'_, InMemoryTaskState>> {
        self.state
            .write()
            .map_err(|err| TaskStoreError::persistence(std::io::Error::other(err.to_string())))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn store(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.id()) {
            return Err(TaskStoreError::DuplicateTask(task.id()));
        }
        state.order.push(task.id());
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.write()?;
        let slot = state
            .tasks
            .get_mut(&task.id())
            .ok_or(TaskStoreError::NotFound(task.id()))?;
        *slot = task.clone();
        Ok(())
    }

    async fn update_if(&self, task: &Task, expected: TaskStatus) -> TaskStoreResult<()> {
        let mut state = self.write()?;
        let slot = state
            .tasks
            .get_mut(&task.id())
            .ok_or(TaskStoreError::NotFound(task.id()))?;
        if slot.status() != expected {
            return Err(TaskStoreError::StatusConflict {
                task_id: task.id(),
                expected,
                actual: slot.status(),
            });
        }
        *slot = task.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    async fn find(
        &self,
        query: &TaskQuery,
        limit: Option<usize>,
        sort: TaskSort,
    ) -> TaskStoreResult<Vec<Task>> {
        let state = self.read()?;
        let rows = state.matching(query, sort);
        let take = limit.unwrap_or(rows.len());
        Ok(rows.into_iter().take(take).cloned().collect())
    }

    async fn count(&self, query: &TaskQuery) -> TaskStoreResult<u64> {
        let state = self.read()?;
        let matched = state
            .tasks
            .values()
            .filter(|task| query.matches(task))
            .count();
        Ok(u64::try_from(matched).unwrap_or(u64::MAX))
    }

    async fn find_page(
        &self,
        query: &TaskQuery,
        page: PageRequest,
        sort: TaskSort,
    ) -> TaskStoreResult<TaskPage> {
        let state = self.read()?;
        let rows = state.matching(query, sort);
        let total = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(page.per_page()).unwrap_or(usize::MAX);
        Ok(TaskPage {
            rows: rows.into_iter().skip(skip).take(take).cloned().collect(),
            total,
        })
    }
}
