//! Decisions that resolve control points.

use crate::utils::{now_utc, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity recorded on decisions the framework synthesizes itself.
pub const SYSTEM_DECIDER: &str = "system";

/// Reason attached to decisions synthesized when a wait times out.
pub const TIMEOUT_REASON: &str = "timeout";

/// Reason attached to decisions synthesized on cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

/// The verdict a decision-maker returns for a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Accept the stage output and move on.
    Proceed,
    /// Re-run the stage with the decision details overlaid on its input.
    Modify,
    /// Stop the pipeline.
    Reject,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Modify => write!(f, "modify"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl DecisionKind {
    /// Kinds offered for stages whose input cannot be corrected.
    #[must_use]
    pub fn read_only() -> BTreeSet<Self> {
        BTreeSet::from([Self::Proceed, Self::Reject])
    }

    /// Kinds offered for stages whose input can be corrected.
    #[must_use]
    pub fn all() -> BTreeSet<Self> {
        BTreeSet::from([Self::Proceed, Self::Modify, Self::Reject])
    }
}

/// The external verdict resolving a control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// What to do next.
    pub kind: DecisionKind,
    /// Overlay fields for `Modify`, a `reason` for `Reject`.
    #[serde(default)]
    pub details: Payload,
    /// Who decided (reviewer, policy service, bot).
    pub decided_by: String,
    /// When the decision was made.
    #[serde(default = "now_utc")]
    pub decided_at: Timestamp,
}

impl Decision {
    /// Creates a decision of the given kind with no details.
    #[must_use]
    pub fn new(kind: DecisionKind, decided_by: impl Into<String>) -> Self {
        Self {
            kind,
            details: Payload::new(),
            decided_by: decided_by.into(),
            decided_at: now_utc(),
        }
    }

    /// Creates a `Proceed` decision.
    #[must_use]
    pub fn proceed(decided_by: impl Into<String>) -> Self {
        Self::new(DecisionKind::Proceed, decided_by)
    }

    /// Creates a `Modify` decision carrying input overrides.
    #[must_use]
    pub fn modify(details: Payload, decided_by: impl Into<String>) -> Self {
        Self::new(DecisionKind::Modify, decided_by).with_details(details)
    }

    /// Creates a `Reject` decision with a human-readable reason.
    #[must_use]
    pub fn reject(reason: impl Into<String>, decided_by: impl Into<String>) -> Self {
        Self::new(DecisionKind::Reject, decided_by).with_detail("reason", serde_json::json!(reason.into()))
    }

    /// The rejection synthesized when a wait times out.
    #[must_use]
    pub fn timeout() -> Self {
        Self::reject(TIMEOUT_REASON, SYSTEM_DECIDER)
    }

    /// The rejection synthesized when a pipeline is cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::reject(CANCELLED_REASON, SYSTEM_DECIDER)
    }

    /// Replaces the details map.
    #[must_use]
    pub fn with_details(mut self, details: Payload) -> Self {
        self.details = details;
        self
    }

    /// Adds a single detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Returns the `reason` detail, if it is a string.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.details.get("reason").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_kind_display() {
        assert_eq!(DecisionKind::Proceed.to_string(), "proceed");
        assert_eq!(DecisionKind::Modify.to_string(), "modify");
        assert_eq!(DecisionKind::Reject.to_string(), "reject");
    }

    #[test]
    fn test_kind_sets() {
        assert!(!DecisionKind::read_only().contains(&DecisionKind::Modify));
        assert_eq!(DecisionKind::all().len(), 3);
    }

    #[test]
    fn test_reject_reason() {
        let decision = Decision::reject("schema drift", "alice");
        assert_eq!(decision.kind, DecisionKind::Reject);
        assert_eq!(decision.reason(), Some("schema drift"));
    }

    #[test]
    fn test_synthetic_decisions() {
        assert_eq!(Decision::timeout().reason(), Some("timeout"));
        assert_eq!(Decision::timeout().decided_by, SYSTEM_DECIDER);
        assert_eq!(Decision::cancelled().reason(), Some("cancelled"));
        assert_eq!(Decision::cancelled().kind, DecisionKind::Reject);
    }

    #[test]
    fn test_modify_details() {
        let mut details = Payload::new();
        details.insert("x".to_string(), json!(5));
        let decision = Decision::modify(details, "policy");
        assert_eq!(decision.details.get("x"), Some(&json!(5)));
        assert_eq!(decision.reason(), None);
    }

    #[test]
    fn test_decision_deserialize_defaults() {
        let decision: Decision =
            serde_json::from_value(json!({"kind": "proceed", "decided_by": "bot"})).unwrap();
        assert_eq!(decision.kind, DecisionKind::Proceed);
        assert!(decision.details.is_empty());
    }
}
