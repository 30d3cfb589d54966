//! Control points: suspension points awaiting an external decision.

use crate::core::{Decision, DecisionKind};
use crate::utils::{generate_uuid, now_utc, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Who resolved a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// A decision submitted by a reviewer, policy or bot.
    Decider,
    /// The wait ran out before any decision arrived.
    Timeout,
    /// The pipeline was cancelled or the point released mid-wait.
    Cancellation,
}

/// A decision together with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The winning decision.
    pub decision: Decision,
    /// Who produced it.
    pub source: ResolutionSource,
}

impl Resolution {
    /// Creates a resolution.
    #[must_use]
    pub fn new(decision: Decision, source: ResolutionSource) -> Self {
        Self { decision, source }
    }

    /// Resolution reported when a point is released before any decision.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(Decision::cancelled(), ResolutionSource::Cancellation)
    }

    /// Returns true if the framework cancelled the point.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.source == ResolutionSource::Cancellation
    }

    /// Returns true if the wait timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.source == ResolutionSource::Timeout
    }
}

/// A snapshot of a control point.
///
/// A control point resolves at most once. The live copy is owned by the
/// coordinator; callers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Control point id.
    pub id: Uuid,
    /// Pipeline that opened the point.
    pub pipeline_id: String,
    /// Stage whose output is under review.
    pub stage: String,
    /// Stage output plus run metadata.
    pub payload: Payload,
    /// Decision kinds a reviewer may submit.
    pub allowed_kinds: BTreeSet<DecisionKind>,
    /// When the point was opened.
    pub created_at: Timestamp,
    /// Whether a decision has been recorded.
    pub resolved: bool,
    /// The recorded decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Who recorded the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResolutionSource>,
}

impl ControlPoint {
    /// Creates an unresolved control point.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        stage: impl Into<String>,
        payload: Payload,
        allowed_kinds: BTreeSet<DecisionKind>,
    ) -> Self {
        Self {
            id: generate_uuid(),
            pipeline_id: pipeline_id.into(),
            stage: stage.into(),
            payload,
            allowed_kinds,
            created_at: now_utc(),
            resolved: false,
            decision: None,
            source: None,
        }
    }

    /// Returns true if reviewers may submit `kind`.
    #[must_use]
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_kinds.contains(&kind)
    }

    /// Records `decision` if the point is still open. First one wins.
    pub fn resolve(&mut self, decision: Decision, source: ResolutionSource) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.decision = Some(decision);
        self.source = Some(source);
        true
    }

    /// Returns the recorded resolution, if any.
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution> {
        Some(Resolution::new(self.decision.clone()?, self.source?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_once() {
        let mut point = ControlPoint::new("p", "fetch", Payload::new(), DecisionKind::read_only());
        assert!(!point.resolved);
        assert!(point.resolution().is_none());
        assert!(point.resolve(Decision::proceed("alice"), ResolutionSource::Decider));
        assert!(!point.resolve(Decision::timeout(), ResolutionSource::Timeout));

        let resolution = point.resolution().unwrap();
        assert_eq!(resolution.decision.kind, DecisionKind::Proceed);
        assert_eq!(resolution.decision.decided_by, "alice");
        assert_eq!(resolution.source, ResolutionSource::Decider);
    }

    #[test]
    fn test_source_is_not_inferred_from_content() {
        let mut point = ControlPoint::new("p", "fetch", Payload::new(), DecisionKind::read_only());
        point.resolve(Decision::cancelled(), ResolutionSource::Decider);

        let resolution = point.resolution().unwrap();
        assert_eq!(resolution.decision.reason(), Some("cancelled"));
        assert!(!resolution.is_cancellation());
        assert!(Resolution::cancelled().is_cancellation());
        assert!(!Resolution::cancelled().is_timeout());
    }

    #[test]
    fn test_allows() {
        let point = ControlPoint::new("p", "fetch", Payload::new(), DecisionKind::read_only());
        assert!(point.allows(DecisionKind::Proceed));
        assert!(point.allows(DecisionKind::Reject));
        assert!(!point.allows(DecisionKind::Modify));
    }
}
