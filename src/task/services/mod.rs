//! Application services for task registration, dispatch and lifecycle
//! orchestration.

mod context;
mod continuation;
mod dispatch;
mod lifecycle;
mod polling;
mod registry;
mod scheduler;

pub use context::TaskExecutionContext;
pub use continuation::{
    ContinuationError, ContinuationPayload, ContinuationResolver, ResumeRequest,
    generate_secret, sign_continuation,
};
pub use lifecycle::{
    CancelTarget, CompleteTaskRequest, CreateTaskRequest, ListTasksRequest, RetryReport,
    RetryTarget, TaskLifecycleError, TaskLifecycleResult, TaskLifecycleService,
};
pub use polling::{PollRecorder, poll_until};
pub use registry::{
    HandlerRegistry, HandlerRegistryBuilder, RegistryError, ResolutionError, UnknownTaskType,
};
pub use scheduler::{Scheduler, SchedulerError, Tick, TickReport};
