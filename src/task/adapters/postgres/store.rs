//! `PostgreSQL` task store.

use super::{
    models::{NewTaskRow, TaskChangeset, TaskRow},
    schema::tasks,
};
use crate::task::{
    domain::{
        PageRequest, PersistedTaskData, PollRecord, Progress, RunnerType, SortDirection, Task,
        TaskId, TaskPage, TaskQuery, TaskSort, TaskSortKey, TaskStatus, TaskTarget, TaskType,
        UserId,
    },
    ports::{TaskStore, TaskStoreError, TaskStoreResult},
};
use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Array, Bool, Text};

/// `PostgreSQL` connection pool type used by the task store.
pub type TaskPgPool = Pool<ConnectionManager<PgConnection>>;

/// `PostgreSQL`-backed task store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: TaskPgPool,
}

impl PostgresTaskStore {
    /// Creates a new store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: TaskPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(TaskStoreError::persistence)?
    }
}

/// Applies every set [`TaskQuery`] constraint to a boxed `tasks` query.
///
/// A macro rather than a function because row and count queries box to
/// different SQL types.
macro_rules! apply_filters {
    ($query:expr, $filter:expr) => {{
        let constraints: &TaskQuery = $filter;
        let mut narrowed = $query;
        if let Some(id) = constraints.id {
            narrowed = narrowed.filter(tasks::id.eq(id.into_inner()));
        }
        if let Some(ids) = &constraints.ids {
            let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.into_inner()).collect();
            narrowed = narrowed.filter(tasks::id.eq_any(uuids));
        }
        if let Some(target_id) = &constraints.target_id {
            narrowed = narrowed.filter(tasks::target_id.eq(target_id.clone()));
        }
        if let Some(target_type) = &constraints.target_type {
            narrowed = narrowed.filter(tasks::target_type.eq(target_type.clone()));
        }
        if let Some(task_type) = &constraints.task_type {
            narrowed = narrowed.filter(tasks::task_type.eq(task_type.as_str().to_owned()));
        }
        if let Some(statuses) = &constraints.statuses {
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_owned()).collect();
            narrowed = narrowed.filter(tasks::status.eq_any(names));
        }
        if let Some(runner_type) = constraints.runner_type {
            narrowed = narrowed.filter(tasks::runner_type.eq(runner_type.as_str().to_owned()));
        }
        if let Some(instant) = constraints.start_time_lte {
            narrowed = narrowed.filter(tasks::start_time.le(instant));
        }
        if let Some(range) = constraints.created {
            narrowed = narrowed.filter(tasks::created_at.between(range.from, range.to));
        }
        if let Some(range) = constraints.completed {
            narrowed = narrowed.filter(tasks::completed_at.between(range.from, range.to));
        }
        if let Some(input) = &constraints.input {
            narrowed = narrowed.filter(
                sql::<Bool>("input #>> ")
                    .bind::<Array<Text>, _>(input.path.clone())
                    .sql(" ILIKE ")
                    .bind::<Text, _>(like_pattern(&input.needle)),
            );
        }
        narrowed
    }};
}

/// Orders a boxed row query by a [`TaskSort`], then by creation time and id.
macro_rules! apply_sort {
    ($query:expr, $sort:expr) => {{
        let sort: TaskSort = $sort;
        let unordered = $query;
        let ordered = match (sort.key, sort.direction) {
            (TaskSortKey::CreatedAt, SortDirection::Asc) => unordered.order_by(tasks::created_at.asc()),
            (TaskSortKey::CreatedAt, SortDirection::Desc) => {
                unordered.order_by(tasks::created_at.desc())
            }
            (TaskSortKey::UpdatedAt, SortDirection::Asc) => unordered.order_by(tasks::updated_at.asc()),
            (TaskSortKey::UpdatedAt, SortDirection::Desc) => {
                unordered.order_by(tasks::updated_at.desc())
            }
            (TaskSortKey::StartTime, SortDirection::Asc) => unordered.order_by(tasks::start_time.asc()),
            (TaskSortKey::StartTime, SortDirection::Desc) => {
                unordered.order_by(tasks::start_time.desc())
            }
            (TaskSortKey::CompletedAt, SortDirection::Asc) => {
                unordered.order_by(tasks::completed_at.asc().nulls_first())
            }
            (TaskSortKey::CompletedAt, SortDirection::Desc) => {
                unordered.order_by(tasks::completed_at.desc().nulls_last())
            }
            (TaskSortKey::Status, SortDirection::Asc) => unordered.order_by(tasks::status.asc()),
            (TaskSortKey::Status, SortDirection::Desc) => unordered.order_by(tasks::status.desc()),
            (TaskSortKey::TaskType, SortDirection::Asc) => unordered.order_by(tasks::task_type.asc()),
            (TaskSortKey::TaskType, SortDirection::Desc) => {
                unordered.order_by(tasks::task_type.desc())
            }
            (TaskSortKey::Progress, SortDirection::Asc) => unordered.order_by(tasks::progress.asc()),
            (TaskSortKey::Progress, SortDirection::Desc) => unordered.order_by(tasks::progress.desc()),
        };
        ordered
            .then_order_by(tasks::created_at.asc())
            .then_order_by(tasks::id.asc())
    }};
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn store(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let new_row = to_new_row(task)?;

        self.run_blocking(move |connection| {
            diesel::insert_into(tasks::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        TaskStoreError::DuplicateTask(task_id)
                    }
                    _ => TaskStoreError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn update(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let changeset = to_changeset(task)?;

        self.run_blocking(move |connection| {
            let updated_rows =
                diesel::update(tasks::table.filter(tasks::id.eq(task_id.into_inner())))
                    .set(&changeset)
                    .execute(connection)
                    .map_err(TaskStoreError::persistence)?;
            if updated_rows == 0 {
                return Err(TaskStoreError::NotFound(task_id));
            }
            Ok(())
        })
        .await
    }

    async fn update_if(&self, task: &Task, expected: TaskStatus) -> TaskStoreResult<()> {
        let task_id = task.id();
        let changeset = to_changeset(task)?;

        self.run_blocking(move |connection| {
            connection.transaction(|tx| {
                let updated_rows = diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.into_inner()))
                        .filter(tasks::status.eq(expected.as_str())),
                )
                .set(&changeset)
                .execute(tx)
                .map_err(TaskStoreError::persistence)?;
                if updated_rows > 0 {
                    return Ok(());
                }
                let stored = tasks::table
                    .filter(tasks::id.eq(task_id.into_inner()))
                    .select(tasks::status)
                    .first::<String>(tx)
                    .optional()
                    .map_err(TaskStoreError::persistence)?
                    .ok_or(TaskStoreError::NotFound(task_id))?;
                let actual = TaskStatus::try_from(stored.as_str())
                    .map_err(TaskStoreError::invalid_persisted_data)?;
                Err(TaskStoreError::StatusConflict {
                    task_id,
                    expected,
                    actual,
                })
            })
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        self.run_blocking(move |connection| {
            tasks::table
                .filter(tasks::id.eq(id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(TaskStoreError::persistence)?
                .map(row_to_task)
                .transpose()
        })
        .await
    }

    async fn find(
        &self,
        query: &TaskQuery,
        limit: Option<usize>,
        sort: TaskSort,
    ) -> TaskStoreResult<Vec<Task>> {
        let filter = query.clone();
        let row_limit = limit
            .map(i64::try_from)
            .transpose()
            .map_err(TaskStoreError::persistence)?;

        self.run_blocking(move |connection| {
            let boxed = apply_filters!(
                tasks::table.select(TaskRow::as_select()).into_boxed(),
                &filter
            );
            let mut ordered = apply_sort!(boxed, sort);
            if let Some(max_rows) = row_limit {
                ordered = ordered.limit(max_rows);
            }
            let rows = ordered
                .load::<TaskRow>(connection)
                .map_err(TaskStoreError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn count(&self, query: &TaskQuery) -> TaskStoreResult<u64> {
        let filter = query.clone();
        self.run_blocking(move |connection| count_matching(connection, &filter))
            .await
    }

    async fn find_page(
        &self,
        query: &TaskQuery,
        page: PageRequest,
        sort: TaskSort,
    ) -> TaskStoreResult<TaskPage> {
        let filter = query.clone();
        let offset = i64::try_from(page.offset()).map_err(TaskStoreError::persistence)?;
        let per_page = i64::from(page.per_page());

        self.run_blocking(move |connection| {
            connection.transaction(|tx| {
                let total = count_matching(tx, &filter)?;
                let boxed = apply_filters!(
                    tasks::table.select(TaskRow::as_select()).into_boxed(),
                    &filter
                );
                let loaded = apply_sort!(boxed, sort)
                    .limit(per_page)
                    .offset(offset)
                    .load::<TaskRow>(tx)
                    .map_err(TaskStoreError::persistence)?;
                let rows = loaded
                    .into_iter()
                    .map(row_to_task)
                    .collect::<TaskStoreResult<Vec<_>>>()?;
                Ok(TaskPage { rows, total })
            })
        })
        .await
    }
}

impl From<DieselError> for TaskStoreError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

fn count_matching(connection: &mut PgConnection, filter: &TaskQuery) -> TaskStoreResult<u64> {
    let total = apply_filters!(tasks::table.count().into_boxed(), filter)
        .get_result::<i64>(connection)
        .map_err(TaskStoreError::persistence)?;
    u64::try_from(total).map_err(TaskStoreError::invalid_persisted_data)
}

/// Wraps `needle` for a substring `ILIKE`, escaping pattern metacharacters.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn to_new_row(task: &Task) -> TaskStoreResult<NewTaskRow> {
    let poll_results =
        serde_json::to_value(task.poll_results()).map_err(TaskStoreError::persistence)?;
    let poll_count = i32::try_from(task.poll_count()).map_err(TaskStoreError::persistence)?;

    Ok(NewTaskRow {
        id: task.id().into_inner(),
        task_type: task.task_type().as_str().to_owned(),
        script_name: task.script_name().map(str::to_owned),
        target_id: task.target().id().to_owned(),
        target_type: task.target().kind().to_owned(),
        runner_type: task.runner_type().as_str().to_owned(),
        start_time: task.start_time(),
        completed_at: task.completed_at(),
        input: task.input().clone(),
        output: task.output().cloned(),
        error: task.error().cloned(),
        status: task.status().as_str().to_owned(),
        context: task.context().clone(),
        poll_results,
        poll_count,
        progress: i16::from(task.progress().value()),
        msg: task.msg().map(str::to_owned),
        options: task.options().clone(),
        user_id: task.user_id().map(|user| user.as_str().to_owned()),
        completed_user_id: task.completed_user_id().map(|user| user.as_str().to_owned()),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
    })
}

fn to_changeset(task: &Task) -> TaskStoreResult<TaskChangeset> {
    let poll_results =
        serde_json::to_value(task.poll_results()).map_err(TaskStoreError::persistence)?;
    let poll_count = i32::try_from(task.poll_count()).map_err(TaskStoreError::persistence)?;

    Ok(TaskChangeset {
        script_name: task.script_name().map(str::to_owned),
        start_time: task.start_time(),
        completed_at: task.completed_at(),
        output: task.output().cloned(),
        error: task.error().cloned(),
        status: task.status().as_str().to_owned(),
        context: task.context().clone(),
        poll_results,
        poll_count,
        progress: i16::from(task.progress().value()),
        msg: task.msg().map(str::to_owned),
        options: task.options().clone(),
        completed_user_id: task.completed_user_id().map(|user| user.as_str().to_owned()),
        updated_at: task.updated_at(),
    })
}

fn row_to_task(row: TaskRow) -> TaskStoreResult<Task> {
    let TaskRow {
        id,
        task_type: persisted_type,
        script_name,
        target_id,
        target_type,
        runner_type: persisted_runner,
        start_time,
        completed_at,
        input,
        output,
        error,
        status: persisted_status,
        context,
        poll_results: persisted_polls,
        poll_count: persisted_poll_count,
        progress: persisted_progress,
        msg,
        options,
        user_id,
        completed_user_id,
        created_at,
        updated_at,
    } = row;

    let task_type =
        TaskType::new(persisted_type).map_err(TaskStoreError::invalid_persisted_data)?;
    let target =
        TaskTarget::new(target_id, target_type).map_err(TaskStoreError::invalid_persisted_data)?;
    let runner_type = RunnerType::try_from(persisted_runner.as_str())
        .map_err(TaskStoreError::invalid_persisted_data)?;
    let status = TaskStatus::try_from(persisted_status.as_str())
        .map_err(TaskStoreError::invalid_persisted_data)?;
    let poll_results = serde_json::from_value::<Vec<PollRecord>>(persisted_polls)
        .map_err(TaskStoreError::invalid_persisted_data)?;
    let poll_count =
        u32::try_from(persisted_poll_count).map_err(TaskStoreError::invalid_persisted_data)?;
    let progress =
        u8::try_from(persisted_progress).map_err(TaskStoreError::invalid_persisted_data)?;

    Ok(Task::from_persisted(PersistedTaskData {
        id: TaskId::from_uuid(id),
        task_type,
        script_name,
        target,
        runner_type,
        start_time,
        completed_at,
        input,
        output,
        error,
        status,
        context,
        poll_results,
        poll_count,
        progress: Progress::new(progress),
        msg,
        options,
        user_id: user_id.map(UserId::new),
        completed_user_id: completed_user_id.map(UserId::new),
        created_at,
        updated_at,
    }))
}
