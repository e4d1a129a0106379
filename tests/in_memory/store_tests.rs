//! Persistence contract tests for the in-memory task store.

use chrono::Utc;
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;
use tasklane::task::{
    adapters::memory::InMemoryTaskStore,
    domain::{
        NewTask, PageRequest, RunnerType, Task, TaskQuery, TaskSort, TaskStatus, TaskTarget,
        TaskType,
    },
    ports::{TaskStore, TaskStoreError},
};

#[fixture]
fn store() -> InMemoryTaskStore {
    InMemoryTaskStore::new()
}

fn export_task(target_id: &str) -> Task {
    Task::new(
        NewTask {
            task_type: TaskType::new("export").expect("valid task type"),
            script_name: None,
            target: TaskTarget::new(target_id, "report").expect("valid target"),
            runner_type: RunnerType::System,
            start_time: Utc::now(),
            input: json!({}),
            options: json!({}),
            user_id: None,
        },
        &DefaultClock,
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stored_task_round_trips(store: InMemoryTaskStore) -> eyre::Result<()> {
    let task = export_task("1");
    store.store(&task).await?;

    let found = store.find_by_id(task.id()).await?;

    eyre::ensure!(found == Some(task));
    eyre::ensure!(store.len()? == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_identifier_is_rejected(store: InMemoryTaskStore) -> eyre::Result<()> {
    let task = export_task("1");
    store.store(&task).await?;

    let result = store.store(&task).await;

    eyre::ensure!(matches!(result, Err(TaskStoreError::DuplicateTask(id)) if id == task.id()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn updating_a_missing_task_fails(store: InMemoryTaskStore) -> eyre::Result<()> {
    let task = export_task("1");

    let result = store.update(&task).await;

    eyre::ensure!(matches!(result, Err(TaskStoreError::NotFound(_))));
    eyre::ensure!(store.is_empty()?);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn update_replaces_the_stored_record(store: InMemoryTaskStore) -> eyre::Result<()> {
    let mut task = export_task("1");
    store.store(&task).await?;
    task.start(&DefaultClock)?;

    store.update(&task).await?;

    let found = store
        .find_by_id(task.id())
        .await?
        .ok_or_else(|| eyre::eyre!("task should exist"))?;
    eyre::ensure!(found.status() == TaskStatus::Running);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn guarded_update_writes_only_from_the_expected_status(
    store: InMemoryTaskStore,
) -> eyre::Result<()> {
    let mut task = export_task("1");
    store.store(&task).await?;
    task.start(&DefaultClock)?;
    store.update_if(&task, TaskStatus::Pending).await?;

    let mut late = task.clone();
    late.cancel(&DefaultClock)?;
    let conflict = store.update_if(&late, TaskStatus::Pending).await;

    eyre::ensure!(matches!(
        conflict,
        Err(TaskStoreError::StatusConflict {
            expected: TaskStatus::Pending,
            actual: TaskStatus::Running,
            ..
        })
    ));
    let found = store
        .find_by_id(task.id())
        .await?
        .ok_or_else(|| eyre::eyre!("task should exist"))?;
    eyre::ensure!(found.status() == TaskStatus::Running);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn guarded_update_of_a_missing_task_fails(store: InMemoryTaskStore) -> eyre::Result<()> {
    let task = export_task("1");

    let result = store.update_if(&task, TaskStatus::Pending).await;

    eyre::ensure!(matches!(result, Err(TaskStoreError::NotFound(id)) if id == task.id()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn find_limits_and_counts_filtered_rows(store: InMemoryTaskStore) -> eyre::Result<()> {
    for target in ["1", "2", "2", "2"] {
        store.store(&export_task(target)).await?;
    }
    let query = TaskQuery::new().with_target_id("2");

    let limited = store
        .find(&query, Some(2), TaskSort::oldest_first())
        .await?;
    let everything = store.find(&query, None, TaskSort::oldest_first()).await?;

    eyre::ensure!(limited.len() == 2);
    eyre::ensure!(everything.len() == 3);
    eyre::ensure!(store.count(&query).await? == 3);
    eyre::ensure!(store.count(&TaskQuery::default()).await? == 4);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn equal_sort_keys_keep_insertion_order(store: InMemoryTaskStore) -> eyre::Result<()> {
    let tasks: Vec<Task> = (0..4).map(|n| export_task(&n.to_string())).collect();
    for task in &tasks {
        store.store(task).await?;
    }

    let found = store
        .find(
            &TaskQuery::default(),
            None,
            TaskSort::new(
                tasklane::task::domain::TaskSortKey::Status,
                tasklane::task::domain::SortDirection::Asc,
            ),
        )
        .await?;

    let expected: Vec<_> = tasks.iter().map(Task::id).collect();
    let actual: Vec<_> = found.iter().map(Task::id).collect();
    eyre::ensure!(actual == expected);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn find_page_reports_total_beyond_the_page(store: InMemoryTaskStore) -> eyre::Result<()> {
    for target in ["1", "2", "3"] {
        store.store(&export_task(target)).await?;
    }

    let page = store
        .find_page(
            &TaskQuery::default(),
            PageRequest::new(2, 2),
            TaskSort::oldest_first(),
        )
        .await?;

    eyre::ensure!(page.total == 3);
    eyre::ensure!(page.rows.len() == 1);
    eyre::ensure!(page.rows.first().map(|task| task.target().id()) == Some("3"));
    Ok(())
}
