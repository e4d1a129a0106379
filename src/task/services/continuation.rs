//! Resumption of `waiting` tasks from signed external callbacks.
//!
//! A handler that suspends may store a secret under the `secret` key of its
//! continuation context. The external system then proves authorship by
//! sending `hex(HMAC-SHA256(secret, "{id}|{result}"))` with the result.

use super::registry::{HandlerRegistry, UnknownTaskType};
use crate::task::{
    domain::{ErrorReport, Task, TaskDomainError, TaskId, TaskStatus},
    ports::{CallbackError, TaskStore, TaskStoreError},
};
use hmac::{Hmac, Mac};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Decoded continuation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationPayload {
    /// Zero for success, anything else for failure.
    #[serde(default)]
    pub code: i64,
    /// Result data handed to the completion callback.
    #[serde(default)]
    pub data: Value,
    /// Optional message copied onto the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// External request resuming a suspended task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// Task to resume.
    pub id: TaskId,
    /// Hex-encoded HMAC over `"{id}|{result}"`; required when the task holds
    /// a secret.
    pub signature: Option<String>,
    /// Raw JSON payload decoding to a [`ContinuationPayload`].
    pub result: String,
}

impl ResumeRequest {
    /// Creates an unsigned request.
    #[must_use]
    pub fn new(id: TaskId, result: impl Into<String>) -> Self {
        Self {
            id,
            signature: None,
            result: result.into(),
        }
    }

    /// Attaches a signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// Errors returned by [`ContinuationResolver::resume`].
#[derive(Debug, Clone, Error)]
pub enum ContinuationError {
    /// No task has the requested id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The task is not `waiting`.
    #[error("task {task_id} is {status}, not waiting")]
    InvalidState {
        /// Requested task.
        task_id: TaskId,
        /// Its current status.
        status: TaskStatus,
    },
    /// The signature is missing or does not match the task secret.
    #[error("continuation signature rejected for task {0}")]
    Authentication(TaskId),
    /// Another continuation for the same task is being applied.
    #[error("continuation already in progress for task {0}")]
    InProgress(TaskId),
    /// The result is not a valid continuation payload.
    #[error("invalid continuation payload: {0}")]
    InvalidPayload(String),
    /// The HMAC key could not be initialised.
    #[error("invalid signing key")]
    SigningKey,
    /// The task type has no completion callback.
    #[error(transparent)]
    UnknownType(#[from] UnknownTaskType),
    /// The completion callback failed; the task is now `failed`.
    #[error(transparent)]
    Callback(#[from] CallbackError),
    /// The state machine rejected the transition.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Signs a continuation payload for task `id` with `secret`.
///
/// # Errors
///
/// Returns [`ContinuationError::SigningKey`] if the key is rejected by the
/// MAC implementation.
pub fn sign_continuation(
    secret: &str,
    id: TaskId,
    payload: &str,
) -> Result<String, ContinuationError> {
    Ok(hex::encode(
        keyed_mac(secret, id, payload)?.finalize().into_bytes(),
    ))
}

/// Generates a random 256-bit continuation secret, hex encoded.
#[must_use]
pub fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn keyed_mac(secret: &str, id: TaskId, payload: &str) -> Result<HmacSha256, ContinuationError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ContinuationError::SigningKey)?;
    mac.update(id.to_string().as_bytes());
    mac.update(b"|");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Resumes `waiting` tasks.
pub struct ContinuationResolver<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    registry: Arc<HandlerRegistry>,
    in_flight: Mutex<HashSet<TaskId>>,
}

/// Marks a task as being resumed until dropped.
struct ResumeClaim<'a> {
    in_flight: &'a Mutex<HashSet<TaskId>>,
    task_id: TaskId,
}

impl Drop for ResumeClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.in_flight.lock() {
            ids.remove(&self.task_id);
        }
    }
}

impl<S, C> ContinuationResolver<S, C>
where
    S: TaskStore + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a resolver.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<C>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            clock,
            registry,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, task_id: TaskId) -> Result<ResumeClaim<'_>, ContinuationError> {
        let mut ids = self
            .in_flight
            .lock()
            .map_err(|_| ContinuationError::InProgress(task_id))?;
        if !ids.insert(task_id) {
            return Err(ContinuationError::InProgress(task_id));
        }
        Ok(ResumeClaim {
            in_flight: &self.in_flight,
            task_id,
        })
    }

    /// Verifies and applies an external continuation, returning the settled
    /// task.
    ///
    /// A non-zero `code` fails the task with the payload as its error. A
    /// zero code runs the completion callback with `data` and the stored
    /// context before marking the task `success` with the payload as output.
    ///
    /// # Errors
    ///
    /// Lookup, state, signature and payload errors leave the task untouched.
    /// A second request for a task whose continuation is still being applied
    /// fails with [`ContinuationError::InProgress`], so the completion
    /// callback runs at most once. [`ContinuationError::Callback`] is
    /// returned after the task has been marked `failed`.
    pub async fn resume(&self, request: ResumeRequest) -> Result<Task, ContinuationError> {
        let ResumeRequest {
            id,
            signature,
            result,
        } = request;
        let _claim = self.claim(id)?;
        let mut task = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ContinuationError::NotFound(id))?;
        if task.status() != TaskStatus::Waiting {
            return Err(ContinuationError::InvalidState {
                task_id: id,
                status: task.status(),
            });
        }

        if task.holds_continuation_secret() {
            let secret = task.continuation_secret().ok_or_else(|| {
                warn!(task_id = %id, "continuation secret is not a string");
                ContinuationError::Authentication(id)
            })?;
            verify_signature(secret, id, &result, signature.as_deref())?;
        }

        let raw: Value = serde_json::from_str(&result)
            .map_err(|err| ContinuationError::InvalidPayload(err.to_string()))?;
        let payload: ContinuationPayload = serde_json::from_value(raw.clone())
            .map_err(|err| ContinuationError::InvalidPayload(err.to_string()))?;

        if payload.code != 0 {
            task.fail(raw, None, &*self.clock)?;
            task.set_msg(payload.msg, &*self.clock);
            self.store.update_if(&task, TaskStatus::Waiting).await?;
            info!(task_id = %id, code = payload.code, "continuation reported failure");
            return Ok(task);
        }

        let callback = self.registry.callback(task.task_type())?;
        if let Err(err) = callback
            .on_complete(&task, &payload.data, Some(task.context()))
            .await
        {
            warn!(task_id = %id, error = %err, "completion callback failed on resume");
            task.fail(ErrorReport::from_error(&err).into_value(), None, &*self.clock)?;
            self.store.update_if(&task, TaskStatus::Waiting).await?;
            return Err(ContinuationError::Callback(err));
        }

        task.succeed(raw, None, &*self.clock)?;
        if payload.msg.is_some() {
            task.set_msg(payload.msg, &*self.clock);
        }
        self.store.update_if(&task, TaskStatus::Waiting).await?;
        info!(task_id = %id, "task resumed to success");
        Ok(task)
    }
}

fn verify_signature(
    secret: &str,
    id: TaskId,
    payload: &str,
    signature: Option<&str>,
) -> Result<(), ContinuationError> {
    let decoded = signature
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(ContinuationError::Authentication(id))?;
    keyed_mac(secret, id, payload)?
        .verify_slice(&decoded)
        .map_err(|_| {
            warn!(task_id = %id, "continuation signature mismatch");
            ContinuationError::Authentication(id)
        })
}
