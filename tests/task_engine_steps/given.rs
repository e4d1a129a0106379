//! Given steps for task engine BDD scenarios.

use super::world::{TaskEngineWorld, run_async};
use crate::test_helpers::{AWAIT_SCRIPT, EXPORT};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use serde_json::json;
use tasklane::config::EngineConfig;
use tasklane::task::{domain::RunnerType, services::CreateTaskRequest};

#[given("an engine with a concurrency limit of {limit:u64}")]
fn engine_with_limit(world: &mut TaskEngineWorld, limit: u64) -> Result<(), eyre::Report> {
    let concurrency_limit = usize::try_from(limit).wrap_err("concurrency limit out of range")?;
    world.wire(EngineConfig::default().with_concurrency_limit(concurrency_limit))
}

fn create_export(
    world: &mut TaskEngineWorld,
    request: CreateTaskRequest,
) -> Result<(), eyre::Report> {
    let created = run_async(world.engine()?.lifecycle.create(request))
        .wrap_err("create export task for scenario")?;
    world.tasks.push(created);
    Ok(())
}

#[given(r#"a system export task for report "{target}""#)]
fn system_export_task(world: &mut TaskEngineWorld, target: String) -> Result<(), eyre::Report> {
    create_export(
        world,
        CreateTaskRequest::new(EXPORT, target, "report").with_runner_type(RunnerType::System),
    )
}

#[given(r#"{count:u64} system export tasks for report "{target}""#)]
fn system_export_tasks(
    world: &mut TaskEngineWorld,
    count: u64,
    target: String,
) -> Result<(), eyre::Report> {
    for _ in 0..count {
        create_export(
            world,
            CreateTaskRequest::new(EXPORT, target.clone(), "report")
                .with_runner_type(RunnerType::System),
        )?;
    }
    Ok(())
}

#[given(r#"a manual export task for report "{target}""#)]
fn manual_export_task(world: &mut TaskEngineWorld, target: String) -> Result<(), eyre::Report> {
    create_export(world, CreateTaskRequest::new(EXPORT, target, "report"))
}

#[given(r#"an export task suspended with secret "{secret}""#)]
fn suspended_export_task(world: &mut TaskEngineWorld, secret: String) -> Result<(), eyre::Report> {
    create_export(
        world,
        CreateTaskRequest::new(EXPORT, "42", "report")
            .with_script_name(AWAIT_SCRIPT)
            .with_input(json!({"secret": secret})),
    )?;
    let task_id = world.task()?.id();
    let waiting = run_async(world.engine()?.scheduler.run_now(task_id))
        .wrap_err("dispatch suspending export task")?;
    eyre::ensure!(
        waiting.continuation_secret().is_some(),
        "suspended task should hold a secret"
    );
    world.tasks.push(waiting);
    Ok(())
}
