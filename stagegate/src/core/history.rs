//! Append-only audit history entries.

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// The control point proceeded.
    Completed,
    /// The control point asked for a re-run with modified input.
    Modified,
    /// The control point rejected the run.
    Rejected,
    /// The stage processor failed.
    Errored,
    /// The run was cancelled during this stage.
    Cancelled,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Modified => write!(f, "modified"),
            Self::Rejected => write!(f, "rejected"),
            Self::Errored => write!(f, "errored"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of a pipeline's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Stage name.
    pub stage: String,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    /// Outcome of the attempt.
    pub outcome: StageOutcome,
    /// Short human-readable summary.
    pub summary: String,
    /// When the entry was recorded.
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    /// Creates a history entry stamped with the current time.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        attempt: u32,
        outcome: StageOutcome,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            attempt,
            outcome,
            summary: summary.into(),
            timestamp: now_utc(),
        }
    }
}
