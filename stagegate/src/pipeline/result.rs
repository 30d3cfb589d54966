//! Results of pipeline runs.

use crate::context::RunIdentity;
use crate::core::{HistoryEntry, PipelineStatus};
use crate::errors::GateError;
use crate::utils::Payload;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// The outcome of a run that was not a stage failure.
///
/// Rejections, timeouts and cancellations are reported here with a
/// `reason`; they are not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Run identity.
    pub identity: RunIdentity,
    /// Final status: `Completed`, `Rejected` or `Cancelled`.
    pub status: PipelineStatus,
    /// Accepted output of every stage that proceeded.
    #[serde(default)]
    pub outputs: HashMap<String, Payload>,
    /// Output of the last stage, when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Payload>,
    /// Why the run stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Stage at which the run stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at_stage: Option<String>,
    /// Full audit trail.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Returns true if every stage proceeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the accepted output of a stage.
    #[must_use]
    pub fn output(&self, stage: &str) -> Option<&Payload> {
        self.outputs.get(stage)
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// A run executing on its own task.
#[derive(Debug)]
pub struct RunHandle {
    identity: RunIdentity,
    handle: JoinHandle<Result<PipelineResult, GateError>>,
}

impl RunHandle {
    pub(crate) fn new(identity: RunIdentity, handle: JoinHandle<Result<PipelineResult, GateError>>) -> Self {
        Self { identity, handle }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> uuid::Uuid {
        self.identity.request_id
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.identity.pipeline_id
    }

    /// Returns true once the run task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's own error, or [`GateError::TaskFailed`] if the task
    /// panicked or was aborted.
    pub async fn join(self) -> Result<PipelineResult, GateError> {
        self.handle
            .await
            .map_err(|e| GateError::TaskFailed(e.to_string()))?
    }
}
