//! When steps for task engine BDD scenarios.

use super::world::{TaskEngineWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use tasklane::task::services::{CancelTarget, ResumeRequest, RetryTarget, sign_continuation};

#[when("the scheduler ticks")]
fn scheduler_ticks(world: &mut TaskEngineWorld) -> Result<(), eyre::Report> {
    let tick = run_async(world.engine()?.scheduler.tick()).wrap_err("scheduler tick")?;
    world.in_flight.push(tick);
    Ok(())
}

#[when("the handlers finish")]
fn handlers_finish(world: &mut TaskEngineWorld) -> Result<(), eyre::Report> {
    world.engine()?.open_gate();
    for tick in world.in_flight.drain(..) {
        run_async(tick.settled());
    }
    Ok(())
}

#[when("the scheduler ticks and the handlers finish")]
fn scheduler_ticks_and_handlers_finish(world: &mut TaskEngineWorld) -> Result<(), eyre::Report> {
    scheduler_ticks(world)?;
    handlers_finish(world)
}

#[when("the task is canceled")]
fn task_is_canceled(world: &mut TaskEngineWorld) -> Result<(), eyre::Report> {
    let task_id = world.task()?.id();
    let canceled = run_async(world.engine()?.lifecycle.cancel(CancelTarget::Id(task_id)))
        .wrap_err("cancel task")?;
    eyre::ensure!(canceled == 1, "expected one task to be canceled, got {canceled}");
    Ok(())
}

#[when("the task is retried")]
fn task_is_retried(world: &mut TaskEngineWorld) -> Result<(), eyre::Report> {
    let task_id = world.task()?.id();
    let report = run_async(world.engine()?.lifecycle.retry(RetryTarget::Id(task_id)))
        .wrap_err("retry task")?;
    eyre::ensure!(report.retried == vec![task_id], "task was not retried");
    Ok(())
}

#[when(r#"a continuation signed with "{key}" reports code {code:i64}"#)]
fn signed_continuation(
    world: &mut TaskEngineWorld,
    key: String,
    code: i64,
) -> Result<(), eyre::Report> {
    let task_id = world.task()?.id();
    let payload = format!(r#"{{"code":{code},"data":{{"pages":3}}}}"#);
    let signature = sign_continuation(&key, task_id, &payload)?;
    let request = ResumeRequest::new(task_id, payload).with_signature(signature);
    world.last_resume = Some(run_async(world.engine()?.resolver.resume(request)));
    Ok(())
}
