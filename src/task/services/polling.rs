//! Bounded, interval-driven poll loop.

use crate::task::{
    domain::{PollResponse, PollState},
    ports::{PollError, PollProbe, TaskStoreError},
};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Sink for poll attempts, invoked before each response is evaluated.
#[async_trait]
pub trait PollRecorder: Send + Sync {
    /// Persists one attempt. `attempt` is one-based.
    ///
    /// # Errors
    ///
    /// A store failure aborts the poll loop.
    async fn record(&self, attempt: u32, response: &PollResponse) -> Result<(), TaskStoreError>;
}

/// Waits `interval`, then invokes `probe`, until the probe reports a terminal
/// outcome or `max_attempts` probes have been made.
///
/// # Errors
///
/// - [`PollError::Failed`] when the probe reports failure;
/// - [`PollError::Probe`] when the probe raises, after recording the attempt
///   as failed;
/// - [`PollError::Timeout`] after `max_attempts` non-terminal responses;
/// - [`PollError::Store`] when recording an attempt fails.
pub async fn poll_until(
    probe: &mut dyn PollProbe,
    max_attempts: u32,
    interval: Duration,
    recorder: &dyn PollRecorder,
) -> Result<Value, PollError> {
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;
        let response = match probe.probe().await {
            Ok(response) => response,
            Err(err) => {
                recorder
                    .record(attempt, &PollResponse::failed(err.to_string()))
                    .await?;
                return Err(PollError::Probe(err));
            }
        };
        recorder.record(attempt, &response).await?;

        match response.result {
            PollState::Pending => {}
            PollState::Success => return Ok(response.data.unwrap_or(Value::Null)),
            PollState::Failed => {
                return Err(PollError::Failed(
                    response
                        .message
                        .unwrap_or_else(|| "external system reported failure".to_owned()),
                ));
            }
        }
    }

    Err(PollError::Timeout {
        attempts: max_attempts,
    })
}
