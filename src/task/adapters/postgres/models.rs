//! Diesel row models for task persistence.

use super::schema::tasks;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    pub id: uuid::Uuid,
    pub task_type: String,
    pub script_name: Option<String>,
    pub target_id: String,
    pub target_type: String,
    pub runner_type: String,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub status: String,
    pub context: Value,
    pub poll_results: Value,
    pub poll_count: i32,
    pub progress: i16,
    pub msg: Option<String>,
    pub options: Value,
    pub user_id: Option<String>,
    pub completed_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    pub id: uuid::Uuid,
    pub task_type: String,
    pub script_name: Option<String>,
    pub target_id: String,
    pub target_type: String,
    pub runner_type: String,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub status: String,
    pub context: Value,
    pub poll_results: Value,
    pub poll_count: i32,
    pub progress: i16,
    pub msg: Option<String>,
    pub options: Value,
    pub user_id: Option<String>,
    pub completed_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changeset for the mutable columns of a task record.
///
/// `None` values are written as `NULL` so that clearing a field (for example
/// `completed_at` on retry) reaches the database.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct TaskChangeset {
    pub script_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub status: String,
    pub context: Value,
    pub poll_results: Value,
    pub poll_count: i32,
    pub progress: i16,
    pub msg: Option<String>,
    pub options: Value,
    pub completed_user_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
