//! End-to-end engine tests over the in-memory store.

use crate::test_helpers::{AWAIT_SCRIPT, EXPORT, TestEngine};
use eyre::{bail, ensure};
use rstest::{fixture, rstest};
use serde_json::json;
use std::time::Duration;
use tasklane::config::EngineConfig;
use tasklane::task::{
    domain::{RunnerType, Task, TaskId, TaskStatus},
    services::{CreateTaskRequest, ResumeRequest, sign_continuation},
};

#[fixture]
fn engine() -> TestEngine {
    TestEngine::new(EngineConfig::default()).expect("engine should wire")
}

async fn create_system_export(engine: &TestEngine) -> eyre::Result<Task> {
    Ok(engine
        .lifecycle
        .create(
            CreateTaskRequest::new(EXPORT, "42", "report")
                .with_runner_type(RunnerType::System)
                .with_input(json!({"format": "csv"})),
        )
        .await?)
}

/// Polls the store until the task reaches `status` or the deadline passes.
async fn wait_for_status(
    engine: &TestEngine,
    id: TaskId,
    status: TaskStatus,
) -> eyre::Result<Task> {
    for _ in 0..200 {
        let task = engine.reload(id).await?;
        if task.status() == status {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("task {id} never reached {status}")
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn export_task_reports_progress_then_succeeds(engine: TestEngine) -> eyre::Result<()> {
    let task = create_system_export(&engine).await?;

    let tick = engine.scheduler.tick().await?;
    ensure!(tick.report.dispatched == 1);
    ensure!(engine.reload(task.id()).await?.status() == TaskStatus::Running);

    engine.open_gate();
    tick.settled().await;

    let settled = engine.reload(task.id()).await?;
    ensure!(settled.status() == TaskStatus::Success);
    ensure!(settled.progress().value() == 100);
    ensure!(settled.output() == Some(&json!({"ok": true, "format": "csv"})));
    ensure!(engine.callback.applied() == vec![(task.id(), json!({"ok": true, "format": "csv"}))]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn periodic_scheduler_drains_the_queue() -> eyre::Result<()> {
    let engine = TestEngine::new(
        EngineConfig::default()
            .with_concurrency_limit(2)
            .with_tick_interval(Duration::from_millis(20)),
    )?;
    engine.open_gate();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(create_system_export(&engine).await?.id());
    }

    let driver = std::sync::Arc::clone(&engine.scheduler).spawn_periodic();
    for id in &ids {
        wait_for_status(&engine, *id, TaskStatus::Success).await?;
    }
    driver.abort();

    ensure!(engine.callback.applied().len() == 5);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn startup_recovery_requeues_interrupted_tasks(engine: TestEngine) -> eyre::Result<()> {
    let task = create_system_export(&engine).await?;
    let stalled = engine.scheduler.tick().await?;
    ensure!(stalled.report.dispatched == 1);
    // A restart abandons the in-flight handler.
    drop(stalled);

    let reset = engine.lifecycle.reset_all().await?;
    ensure!(reset == 1);
    ensure!(engine.reload(task.id()).await?.status() == TaskStatus::Pending);

    engine.open_gate();
    engine.scheduler.tick().await?.settled().await;
    ensure!(engine.reload(task.id()).await?.status() == TaskStatus::Success);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn suspended_export_resumes_from_signed_continuation(
    engine: TestEngine,
) -> eyre::Result<()> {
    let task = engine
        .lifecycle
        .create(
            CreateTaskRequest::new(EXPORT, "42", "report")
                .with_script_name(AWAIT_SCRIPT)
                .with_input(json!({"secret": "shared-key"})),
        )
        .await?;
    let waiting = engine.scheduler.run_now(task.id()).await?;
    ensure!(waiting.status() == TaskStatus::Waiting);
    ensure!(waiting.continuation_secret() == Some("shared-key"));

    let payload = r#"{"code":0,"data":{"url":"https://files.example/42.csv"}}"#;
    let signature = sign_continuation("shared-key", task.id(), payload)?;
    let resumed = engine
        .resolver
        .resume(ResumeRequest::new(task.id(), payload).with_signature(signature))
        .await?;

    ensure!(resumed.status() == TaskStatus::Success);
    ensure!(
        engine.callback.applied()
            == vec![(task.id(), json!({"url": "https://files.example/42.csv"}))]
    );
    Ok(())
}
