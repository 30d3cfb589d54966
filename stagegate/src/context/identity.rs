//! Run identity for tracking pipeline executions.

use crate::utils::generate_uuid_v7;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a pipeline run.
///
/// `request_id` is unique per run. `pipeline_id` names the lineage the run
/// belongs to and may be shared by many requests; topics and cancellation
/// are keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Unique id of this run.
    pub request_id: Uuid,
    /// Pipeline lineage id.
    pub pipeline_id: String,
}

impl RunIdentity {
    /// Creates an identity whose pipeline id is derived from the request id.
    #[must_use]
    pub fn new() -> Self {
        let request_id = generate_uuid_v7();
        Self {
            request_id,
            pipeline_id: request_id.to_string(),
        }
    }

    /// Creates an identity for an existing pipeline lineage.
    #[must_use]
    pub fn with_pipeline_id(pipeline_id: impl Into<String>) -> Self {
        Self {
            request_id: generate_uuid_v7(),
            pipeline_id: pipeline_id.into(),
        }
    }

    /// Returns the identity as a JSON map for log and message content.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "request_id": self.request_id.to_string(),
            "pipeline_id": self.pipeline_id,
        })
    }
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pipeline_id, self.request_id)
    }
}
