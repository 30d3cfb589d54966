//! Bus messages and the well-known topic layout.

use crate::utils::{now_utc, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The type of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Pipeline status changed.
    StatusUpdate,
    /// A control point is waiting for a decision.
    ControlPointOpened,
    /// A control point was resolved.
    ControlPointResolved,
    /// A decision for a control point.
    Decision,
    /// A stage failed.
    Error,
    /// A pipeline completed.
    Completion,
    /// Request to cancel a pipeline.
    CancelRequest,
    /// Anything else a component wants to broadcast.
    Custom,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusUpdate => write!(f, "status-update"),
            Self::ControlPointOpened => write!(f, "control-point-opened"),
            Self::ControlPointResolved => write!(f, "control-point-resolved"),
            Self::Decision => write!(f, "decision"),
            Self::Error => write!(f, "error"),
            Self::Completion => write!(f, "completion"),
            Self::CancelRequest => write!(f, "cancel-request"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// A message travelling over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: Uuid,
    /// Dot-separated topic, e.g. `status.update.pipeline-42`.
    pub topic: String,
    /// Component that published the message.
    pub source_component: String,
    /// Component the message is addressed to; `None` broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_component: Option<String>,
    /// Message type.
    pub kind: MessageKind,
    /// Opaque payload.
    #[serde(default)]
    pub content: Payload,
    /// When the message was created.
    pub timestamp: Timestamp,
}

impl Message {
    /// Creates a broadcast message with empty content.
    #[must_use]
    pub fn new(topic: impl Into<String>, kind: MessageKind, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            source_component: source.into(),
            target_component: None,
            kind,
            content: Payload::new(),
            timestamp: now_utc(),
        }
    }

    /// Addresses the message to a single component.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_component = Some(target.into());
        self
    }

    /// Replaces the content.
    #[must_use]
    pub fn with_content(mut self, content: Payload) -> Self {
        self.content = content;
        self
    }

    /// Adds a content field.
    #[must_use]
    pub fn add_content(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    /// Returns true if the message has no target component.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.target_component.is_none()
    }

    /// Returns true if the message should reach `component_id`.
    #[must_use]
    pub fn is_addressed_to(&self, component_id: &str) -> bool {
        self.target_component
            .as_deref()
            .map_or(true, |target| target == component_id)
    }

    /// Reads a string field from the content.
    #[must_use]
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Topic builders for the fixed topic layout.
pub mod topics {
    /// `status.update.<pipeline_id>`
    #[must_use]
    pub fn status_update(pipeline_id: &str) -> String {
        format!("status.update.{pipeline_id}")
    }

    /// `error.<pipeline_id>`
    #[must_use]
    pub fn error(pipeline_id: &str) -> String {
        format!("error.{pipeline_id}")
    }

    /// `completion.<pipeline_id>`
    #[must_use]
    pub fn completion(pipeline_id: &str) -> String {
        format!("completion.{pipeline_id}")
    }

    /// `controlpoint.opened.<pipeline_id>`
    #[must_use]
    pub fn control_point_opened(pipeline_id: &str) -> String {
        format!("controlpoint.opened.{pipeline_id}")
    }

    /// `controlpoint.resolved.<pipeline_id>`
    #[must_use]
    pub fn control_point_resolved(pipeline_id: &str) -> String {
        format!("controlpoint.resolved.{pipeline_id}")
    }

    /// `decision.<pipeline_id>`
    #[must_use]
    pub fn decision(pipeline_id: &str) -> String {
        format!("decision.{pipeline_id}")
    }

    /// `cancel.<pipeline_id>`
    #[must_use]
    pub fn cancel(pipeline_id: &str) -> String {
        format!("cancel.{pipeline_id}")
    }

    /// Every opened control point, any pipeline.
    pub const ALL_CONTROL_POINTS_OPENED: &str = "controlpoint.opened.*";

    /// Every decision, any pipeline.
    pub const ALL_DECISIONS: &str = "decision.#";

    /// Every cancellation request, any pipeline.
    pub const ALL_CANCELLATIONS: &str = "cancel.#";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let message = Message::new("status.update.p1", MessageKind::StatusUpdate, "engine");
        assert_eq!(message.topic, "status.update.p1");
        assert!(message.is_broadcast());
        assert!(message.content.is_empty());
    }

    #[test]
    fn test_message_targeting() {
        let message = Message::new("x", MessageKind::Custom, "a").with_target("b");
        assert!(!message.is_broadcast());
        assert!(message.is_addressed_to("b"));
        assert!(!message.is_addressed_to("c"));

        let broadcast = Message::new("x", MessageKind::Custom, "a");
        assert!(broadcast.is_addressed_to("anyone"));
    }

    #[test]
    fn test_message_content() {
        let message = Message::new("x", MessageKind::Custom, "a")
            .add_content("stage", json!("fetch"))
            .add_content("count", json!(3));
        assert_eq!(message.content_str("stage"), Some("fetch"));
        assert_eq!(message.content_str("count"), None);
    }

    #[test]
    fn test_message_kind_serialize() {
        let json = serde_json::to_string(&MessageKind::ControlPointOpened).unwrap();
        assert_eq!(json, r#""control-point-opened""#);
        assert_eq!(MessageKind::StatusUpdate.to_string(), "status-update");
    }

    #[test]
    fn test_topic_builders() {
        assert_eq!(topics::status_update("42"), "status.update.42");
        assert_eq!(topics::control_point_opened("42"), "controlpoint.opened.42");
        assert_eq!(topics::decision("42"), "decision.42");
        assert_eq!(topics::error("42"), "error.42");
        assert_eq!(topics::completion("42"), "completion.42");
    }

    #[test]
    fn test_message_serialization() {
        let message = Message::new("t", MessageKind::Decision, "a").add_content("k", json!(1));
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, message.id);
        assert_eq!(back.kind, MessageKind::Decision);
    }
}
