//! Task execution engine.
//!
//! A task is created `pending`, dispatched to `running` by the
//! [`Scheduler`](services::Scheduler) (or an operator's run-now request), and
//! ends `success`, `failed` or `canceled`. Handlers may suspend a task to
//! `waiting` until an external system resumes it through the
//! [`ContinuationResolver`](services::ContinuationResolver). Failed and
//! canceled tasks can be retried.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
