//! Store-agnostic task filters, ordering and pagination.

use super::{RunnerType, Task, TaskId, TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive timestamp range (`BETWEEN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Lower bound, inclusive.
    pub from: DateTime<Utc>,
    /// Upper bound, inclusive.
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Creates an inclusive range.
    #[must_use]
    pub const fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Returns whether `instant` lies within the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }
}

/// Case-insensitive substring match against a nested `input` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMatch {
    /// Object keys leading to the field, outermost first.
    pub path: Vec<String>,
    /// Substring to look for.
    pub needle: String,
}

impl InputMatch {
    /// Creates a fuzzy match on the field at `path`.
    #[must_use]
    pub fn new(path: impl IntoIterator<Item = impl Into<String>>, needle: impl Into<String>) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            needle: needle.into(),
        }
    }

    /// Returns whether the task input satisfies the match.
    #[must_use]
    pub fn matches(&self, input: &Value) -> bool {
        let mut current = input;
        for key in &self.path {
            match current.get(key) {
                Some(next) => current = next,
                None => return false,
            }
        }
        let haystack = match current {
            Value::String(text) => text.clone(),
            Value::Null => return false,
            other => other.to_string(),
        };
        haystack
            .to_lowercase()
            .contains(&self.needle.to_lowercase())
    }
}

/// Filter over task records. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    /// Exact task identifier.
    pub id: Option<TaskId>,
    /// Identifier set (`IN`).
    pub ids: Option<Vec<TaskId>>,
    /// Exact target object identifier.
    pub target_id: Option<String>,
    /// Exact target object type.
    pub target_type: Option<String>,
    /// Exact task type.
    pub task_type: Option<TaskType>,
    /// Status set (`IN`).
    pub statuses: Option<Vec<TaskStatus>>,
    /// Exact runner type.
    pub runner_type: Option<RunnerType>,
    /// Upper bound on `start_time` (`<=`).
    pub start_time_lte: Option<DateTime<Utc>>,
    /// Creation timestamp range.
    pub created: Option<DateRange>,
    /// Completion timestamp range.
    pub completed: Option<DateRange>,
    /// Fuzzy match on a nested input field.
    pub input: Option<InputMatch>,
}

impl TaskQuery {
    /// Creates an unconstrained query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a single task identifier.
    #[must_use]
    pub const fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Restricts to a set of task identifiers.
    #[must_use]
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    /// Restricts to a target object identifier.
    #[must_use]
    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Restricts to a target object type.
    #[must_use]
    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    /// Restricts to a task type.
    #[must_use]
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Restricts to a single status.
    #[must_use]
    pub fn with_status(self, status: TaskStatus) -> Self {
        self.with_statuses([status])
    }

    /// Restricts to any of the given statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Restricts to a runner type.
    #[must_use]
    pub const fn with_runner_type(mut self, runner_type: RunnerType) -> Self {
        self.runner_type = Some(runner_type);
        self
    }

    /// Restricts to tasks whose start time is at or before `instant`.
    #[must_use]
    pub const fn with_start_time_lte(mut self, instant: DateTime<Utc>) -> Self {
        self.start_time_lte = Some(instant);
        self
    }

    /// Restricts creation time to `range`.
    #[must_use]
    pub const fn with_created(mut self, range: DateRange) -> Self {
        self.created = Some(range);
        self
    }

    /// Restricts completion time to `range`.
    #[must_use]
    pub const fn with_completed(mut self, range: DateRange) -> Self {
        self.completed = Some(range);
        self
    }

    /// Adds a fuzzy input match.
    #[must_use]
    pub fn with_input(mut self, input: InputMatch) -> Self {
        self.input = Some(input);
        self
    }

    /// Evaluates the query against a task in memory.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.id.is_none_or(|id| task.id() == id)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&task.id()))
            && self
                .target_id
                .as_deref()
                .is_none_or(|id| task.target().id() == id)
            && self
                .target_type
                .as_deref()
                .is_none_or(|kind| task.target().kind() == kind)
            && self
                .task_type
                .as_ref()
                .is_none_or(|task_type| task.task_type() == task_type)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&task.status()))
            && self
                .runner_type
                .is_none_or(|runner_type| task.runner_type() == runner_type)
            && self
                .start_time_lte
                .is_none_or(|instant| task.start_time() <= instant)
            && self
                .created
                .is_none_or(|range| range.contains(task.created_at()))
            && self.completed.is_none_or(|range| {
                task.completed_at()
                    .is_some_and(|completed_at| range.contains(completed_at))
            })
            && self
                .input
                .as_ref()
                .is_none_or(|input| input.matches(task.input()))
    }
}

/// Sortable task columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSortKey {
    /// Creation timestamp.
    #[default]
    CreatedAt,
    /// Last update timestamp.
    UpdatedAt,
    /// Earliest dispatch time.
    StartTime,
    /// Completion timestamp.
    CompletedAt,
    /// Lifecycle status.
    Status,
    /// Task type.
    TaskType,
    /// Progress percentage.
    Progress,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

/// Single-key ordering. Ties keep the store's natural (insertion) order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSort {
    /// Column to order by.
    pub key: TaskSortKey,
    /// Direction of the ordering.
    pub direction: SortDirection,
}

impl TaskSort {
    /// Creates an ordering.
    #[must_use]
    pub const fn new(key: TaskSortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Creation order, oldest first.
    #[must_use]
    pub const fn oldest_first() -> Self {
        Self::new(TaskSortKey::CreatedAt, SortDirection::Asc)
    }

    /// Creation order, newest first.
    #[must_use]
    pub const fn newest_first() -> Self {
        Self::new(TaskSortKey::CreatedAt, SortDirection::Desc)
    }

    /// Compares two tasks under this ordering.
    #[must_use]
    pub fn compare(&self, left: &Task, right: &Task) -> std::cmp::Ordering {
        let ordering = match self.key {
            TaskSortKey::CreatedAt => left.created_at().cmp(&right.created_at()),
            TaskSortKey::UpdatedAt => left.updated_at().cmp(&right.updated_at()),
            TaskSortKey::StartTime => left.start_time().cmp(&right.start_time()),
            TaskSortKey::CompletedAt => left.completed_at().cmp(&right.completed_at()),
            TaskSortKey::Status => left.status().as_str().cmp(right.status().as_str()),
            TaskSortKey::TaskType => left.task_type().cmp(right.task_type()),
            TaskSortKey::Progress => left.progress().cmp(&right.progress()),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    per_page: u32,
    current_page: u32,
}

impl PageRequest {
    /// Default page size.
    pub const DEFAULT_PER_PAGE: u32 = 20;

    /// Creates a page selection; zero values are raised to one.
    #[must_use]
    pub fn new(per_page: u32, current_page: u32) -> Self {
        Self {
            per_page: per_page.max(1),
            current_page: current_page.max(1),
        }
    }

    /// Returns the page size.
    #[must_use]
    pub const fn per_page(self) -> u32 {
        self.per_page
    }

    /// Returns the one-based page number.
    #[must_use]
    pub const fn current_page(self) -> u32 {
        self.current_page
    }

    /// Returns the number of rows skipped before this page.
    #[must_use]
    pub fn offset(self) -> u64 {
        u64::from(self.per_page) * u64::from(self.current_page.saturating_sub(1))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PER_PAGE, 1)
    }
}

/// A page of tasks plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    /// Tasks on the requested page.
    pub rows: Vec<Task>,
    /// Total number of tasks matching the filter.
    pub total: u64,
}
