//! Error types for the stagegate framework.
//!
//! Only programming-usage errors and fatal stage failures are errors here.
//! Rejections, timeouts and cancellations are ordinary pipeline outcomes and
//! are reported through [`crate::core::PipelineStatus`] instead.

use crate::utils::Payload;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for stagegate operations.
#[derive(Debug, Error)]
pub enum GateError {
    /// A component tried to subscribe before registering with the bus.
    #[error("Component '{component_id}' is not registered with the message bus")]
    UnregisteredComponent {
        /// The offending component.
        component_id: String,
    },

    /// A subscription pattern could not be parsed.
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidTopicPattern {
        /// The raw pattern.
        pattern: String,
        /// Why the pattern was refused.
        reason: String,
    },

    /// No live control point exists with this id.
    #[error("Unknown control point: {0}")]
    UnknownControlPoint(Uuid),

    /// Another task is already waiting on this control point.
    #[error("Control point {0} already has a waiter")]
    AlreadyAwaited(Uuid),

    /// A stage processor returned an error. Fatal for the run.
    #[error("Stage '{stage}' failed in pipeline '{pipeline_id}': {message}")]
    StageFailed {
        /// The pipeline the stage belonged to.
        pipeline_id: String,
        /// The request that was running.
        request_id: Uuid,
        /// The failing stage.
        stage: String,
        /// The flattened error chain.
        message: String,
    },

    /// A stage list or run option was rejected before execution.
    #[error("Pipeline validation error: {0}")]
    Validation(String),

    /// A bus message did not carry the expected content.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A spawned run task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    /// Creates a stage failure error.
    #[must_use]
    pub fn stage_failed(
        pipeline_id: impl Into<String>,
        request_id: Uuid,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StageFailed {
            pipeline_id: pipeline_id.into(),
            request_id,
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a malformed message error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnregisteredComponent { .. } => "BUS_UNREGISTERED_COMPONENT",
            Self::InvalidTopicPattern { .. } => "BUS_INVALID_PATTERN",
            Self::UnknownControlPoint(_) => "CONTROL_UNKNOWN_POINT",
            Self::AlreadyAwaited(_) => "CONTROL_ALREADY_AWAITED",
            Self::StageFailed { .. } => "PIPELINE_STAGE_FAILED",
            Self::Validation(_) => "PIPELINE_VALIDATION",
            Self::MalformedMessage(_) => "BUS_MALFORMED_MESSAGE",
            Self::TaskFailed(_) => "PIPELINE_TASK_FAILED",
            Self::Config(_) => "CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Converts to a payload suitable for an `error.*` bus message.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let mut map = Payload::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        if let Self::StageFailed {
            pipeline_id,
            request_id,
            stage,
            message,
        } = self
        {
            map.insert("pipeline_id".to_string(), serde_json::json!(pipeline_id));
            map.insert("request_id".to_string(), serde_json::json!(request_id.to_string()));
            map.insert("stage".to_string(), serde_json::json!(stage));
            map.insert("error".to_string(), serde_json::json!(message));
        }

        map
    }
}
