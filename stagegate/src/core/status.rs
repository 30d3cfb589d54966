//! Pipeline status enum and its state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of one pipeline run.
///
/// ```text
/// Pending -> Running -> {AwaitingDecision <-> Running}
///         -> (Completed | Rejected | Errored | Cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Context created, no stage started yet.
    Pending,
    /// A stage processor is executing.
    Running,
    /// Suspended at a control point.
    AwaitingDecision,
    /// A decision rejected the run (including timeouts).
    Rejected,
    /// The run was cancelled externally.
    Cancelled,
    /// A stage processor failed.
    Errored,
    /// Every stage proceeded.
    Completed,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::AwaitingDecision => write!(f, "awaiting_decision"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Errored => write!(f, "errored"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Errored | Self::Cancelled
        )
    }

    /// Returns true if the run finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::Errored | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::AwaitingDecision | Self::Errored | Self::Completed | Self::Cancelled
            ),
            Self::AwaitingDecision => {
                matches!(next, Self::Running | Self::Rejected | Self::Cancelled)
            }
            Self::Rejected | Self::Cancelled | Self::Errored | Self::Completed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status_display() {
        assert_eq!(PipelineStatus::Pending.to_string(), "pending");
        assert_eq!(PipelineStatus::AwaitingDecision.to_string(), "awaiting_decision");
        assert_eq!(PipelineStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_pipeline_status_is_terminal() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Rejected.is_terminal());
        assert!(PipelineStatus::Errored.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Pending.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(!PipelineStatus::AwaitingDecision.is_terminal());
    }

    #[test]
    fn test_pipeline_status_transitions() {
        assert!(PipelineStatus::Pending.can_transition_to(PipelineStatus::Running));
        assert!(PipelineStatus::Running.can_transition_to(PipelineStatus::AwaitingDecision));
        assert!(PipelineStatus::AwaitingDecision.can_transition_to(PipelineStatus::Running));
        assert!(PipelineStatus::AwaitingDecision.can_transition_to(PipelineStatus::Rejected));
        assert!(PipelineStatus::Running.can_transition_to(PipelineStatus::Cancelled));

        assert!(!PipelineStatus::Pending.can_transition_to(PipelineStatus::Completed));
        assert!(!PipelineStatus::Running.can_transition_to(PipelineStatus::Rejected));
        assert!(!PipelineStatus::Completed.can_transition_to(PipelineStatus::Cancelled));
    }

    #[test]
    fn test_pipeline_status_serialize() {
        let json = serde_json::to_string(&PipelineStatus::AwaitingDecision).unwrap();
        assert_eq!(json, r#""awaiting_decision""#);

        let deserialized: PipelineStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, PipelineStatus::AwaitingDecision);
    }
}
