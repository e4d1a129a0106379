//! Domain model for the task execution engine.
//!
//! The task domain models the task record, its status state machine, poll
//! history, failure reports and store-agnostic query values while keeping all
//! infrastructure concerns outside of the domain boundary.

mod error;
mod ids;
mod poll;
mod query;
mod report;
mod status;
mod task;

pub use error::{ParseRunnerTypeError, ParseTaskStatusError, TaskDomainError};
pub use ids::{TaskId, TaskTarget, TaskType, UserId};
pub use poll::{PollRecord, PollResponse, PollState};
pub use query::{
    DateRange, InputMatch, PageRequest, SortDirection, TaskPage, TaskQuery, TaskSort, TaskSortKey,
};
pub use report::{ErrorReport, redact_paths};
pub use status::{RunnerType, TaskStatus};
pub use task::{CONTINUATION_SECRET_KEY, NewTask, PersistedTaskData, Progress, Task};
