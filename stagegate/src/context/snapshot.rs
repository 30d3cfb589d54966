//! Immutable, serializable views of a pipeline run.

use super::RunIdentity;
use crate::core::{HistoryEntry, PipelineStatus};
use crate::utils::{Payload, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-in-time copy of a [`super::PipelineContext`].
///
/// Observers never see the live context; they read snapshots published by
/// the engine task after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Run identity.
    pub identity: RunIdentity,
    /// Current status.
    pub status: PipelineStatus,
    /// Stage executing or awaiting a decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: Payload,
    /// Audit trail so far.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Control points opened by the run and not yet released.
    #[serde(default)]
    pub open_control_points: Vec<Uuid>,
    /// Last error message, set only when errored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run was created.
    pub started_at: Timestamp,
}

impl ContextSnapshot {
    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.identity.request_id
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.identity.pipeline_id
    }

    /// Returns true once the run reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
