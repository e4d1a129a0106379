//! Port contracts for the task execution engine.
//!
//! Ports define infrastructure-agnostic interfaces used by task services:
//! persistence on one side, handler modules and completion callbacks on the
//! other.

pub mod handler;
pub mod store;

pub use handler::{
    CallbackError, CompletionCallback, ExecutionContext, ExecutionContextError, HandlerError,
    HandlerOutcome, HandlerResult, PollError, PollOptions, PollProbe, ProbeError, Suspension,
    TaskHandler,
};
pub use store::{TaskStore, TaskStoreError, TaskStoreResult};
