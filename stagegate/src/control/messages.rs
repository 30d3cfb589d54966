//! Typed content of the control-point bus messages.
//!
//! Each type converts to and from a [`Message`] whose `content` holds the
//! struct's fields as snake_case JSON keys.

use super::ControlPoint;
use crate::core::{topics, Decision, DecisionKind, Message, MessageKind};
use crate::errors::GateError;
use crate::utils::{now_utc, payload_from_value, Payload, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn to_content<T: Serialize>(value: &T) -> Result<Payload, GateError> {
    Ok(payload_from_value(serde_json::to_value(value)?))
}

fn from_content<T: DeserializeOwned>(message: &Message, expected: MessageKind) -> Result<T, GateError> {
    if message.kind != expected {
        return Err(GateError::malformed(format!(
            "expected a {expected} message on '{}', got {}",
            message.topic, message.kind
        )));
    }
    let object: serde_json::Map<String, serde_json::Value> =
        message.content.clone().into_iter().collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| GateError::malformed(format!("{} content on '{}': {e}", expected, message.topic)))
}

/// Announces a control point waiting for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPointOpened {
    /// Control point id.
    pub control_point_id: Uuid,
    /// Pipeline that opened the point.
    pub pipeline_id: String,
    /// Stage under review.
    pub stage: String,
    /// Stage output plus run metadata.
    pub payload: Payload,
    /// Decision kinds the reviewer may submit.
    pub allowed_kinds: Vec<DecisionKind>,
    /// When the point was opened.
    pub created_at: Timestamp,
}

impl ControlPointOpened {
    /// Describes a freshly created control point.
    #[must_use]
    pub fn from_point(point: &ControlPoint) -> Self {
        Self {
            control_point_id: point.id,
            pipeline_id: point.pipeline_id.clone(),
            stage: point.stage.clone(),
            payload: point.payload.clone(),
            allowed_kinds: point.allowed_kinds.iter().copied().collect(),
            created_at: point.created_at,
        }
    }

    /// Returns true if the reviewer may submit `kind`.
    #[must_use]
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_kinds.contains(&kind)
    }

    /// Builds the `controlpoint.opened.<pipeline_id>` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_message(&self, source: &str) -> Result<Message, GateError> {
        Ok(Message::new(
            topics::control_point_opened(&self.pipeline_id),
            MessageKind::ControlPointOpened,
            source,
        )
        .with_content(to_content(self)?))
    }

    /// Parses an opened message.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::MalformedMessage`] for the wrong kind or content.
    pub fn from_message(message: &Message) -> Result<Self, GateError> {
        from_content(message, MessageKind::ControlPointOpened)
    }
}

/// A decision submitted over the bus on `decision.<pipeline_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMessage {
    /// Control point being decided.
    pub control_point_id: Uuid,
    /// Verdict.
    pub kind: DecisionKind,
    /// Overlay fields or rejection reason.
    #[serde(default)]
    pub details: Payload,
    /// Who decided.
    pub decided_by: String,
}

impl DecisionMessage {
    /// Wraps a decision for the given control point.
    #[must_use]
    pub fn new(control_point_id: Uuid, decision: &Decision) -> Self {
        Self {
            control_point_id,
            kind: decision.kind,
            details: decision.details.clone(),
            decided_by: decision.decided_by.clone(),
        }
    }

    /// Converts into a decision stamped with the current time.
    #[must_use]
    pub fn into_decision(self) -> Decision {
        Decision {
            kind: self.kind,
            details: self.details,
            decided_by: self.decided_by,
            decided_at: now_utc(),
        }
    }

    /// Builds the `decision.<pipeline_id>` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the details cannot be serialized.
    pub fn to_message(&self, pipeline_id: &str, source: &str) -> Result<Message, GateError> {
        Ok(
            Message::new(topics::decision(pipeline_id), MessageKind::Decision, source)
                .with_content(to_content(self)?),
        )
    }

    /// Parses a decision message.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::MalformedMessage`] for the wrong kind or content.
    pub fn from_message(message: &Message) -> Result<Self, GateError> {
        from_content(message, MessageKind::Decision)
    }
}

/// Announces that a control point was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPointResolved {
    /// Control point id.
    pub control_point_id: Uuid,
    /// Pipeline that opened the point.
    pub pipeline_id: String,
    /// Stage under review.
    pub stage: String,
    /// The winning decision.
    pub decision: Decision,
}

impl ControlPointResolved {
    /// Builds the `controlpoint.resolved.<pipeline_id>` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision cannot be serialized.
    pub fn to_message(&self, source: &str) -> Result<Message, GateError> {
        Ok(Message::new(
            topics::control_point_resolved(&self.pipeline_id),
            MessageKind::ControlPointResolved,
            source,
        )
        .with_content(to_content(self)?))
    }

    /// Parses a resolved message.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::MalformedMessage`] for the wrong kind or content.
    pub fn from_message(message: &Message) -> Result<Self, GateError> {
        from_content(message, MessageKind::ControlPointResolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opened_message_topic_and_content() {
        let mut payload = Payload::new();
        payload.insert("rows".to_string(), json!(12));
        let point = ControlPoint::new("ingest-7", "parse", payload, DecisionKind::all());

        let message = ControlPointOpened::from_point(&point).to_message("coordinator").unwrap();
        assert_eq!(message.topic, "controlpoint.opened.ingest-7");
        assert_eq!(message.kind, MessageKind::ControlPointOpened);
        assert_eq!(message.content["stage"], json!("parse"));
        assert_eq!(message.content["allowed_kinds"], json!(["proceed", "modify", "reject"]));

        let parsed = ControlPointOpened::from_message(&message).unwrap();
        assert_eq!(parsed.control_point_id, point.id);
        assert!(parsed.allows(DecisionKind::Modify));
    }

    #[test]
    fn test_decision_message_from_raw_content() {
        let id = Uuid::new_v4();
        let message = Message::new("decision.ingest-7", MessageKind::Decision, "reviewer")
            .add_content("control_point_id", json!(id.to_string()))
            .add_content("kind", json!("reject"))
            .add_content("details", json!({"reason": "bad schema"}))
            .add_content("decided_by", json!("alice"));

        let decision = DecisionMessage::from_message(&message).unwrap();
        assert_eq!(decision.control_point_id, id);

        let decision = decision.into_decision();
        assert_eq!(decision.kind, DecisionKind::Reject);
        assert_eq!(decision.reason(), Some("bad schema"));
    }

    #[test]
    fn test_decision_message_wrong_kind() {
        let message = Message::new("decision.x", MessageKind::Custom, "someone");
        let err = DecisionMessage::from_message(&message).unwrap_err();
        assert_eq!(err.code(), "BUS_MALFORMED_MESSAGE");
    }

    #[test]
    fn test_decision_message_missing_fields() {
        let message = Message::new("decision.x", MessageKind::Decision, "someone")
            .add_content("kind", json!("proceed"));
        assert!(DecisionMessage::from_message(&message).is_err());
    }
}
