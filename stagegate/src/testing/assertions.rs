//! Test assertions for pipeline results and histories.

use crate::core::{HistoryEntry, PipelineStatus, StageOutcome};
use crate::pipeline::PipelineResult;

/// Asserts that the result has the expected status.
pub fn assert_status(result: &PipelineResult, expected: PipelineStatus) {
    assert_eq!(
        result.status, expected,
        "Expected status {expected}, got {} (reason: {:?})",
        result.status, result.reason
    );
}

/// Asserts that the run completed.
pub fn assert_completed(result: &PipelineResult) {
    assert_status(result, PipelineStatus::Completed);
    assert!(result.reason.is_none(), "Completed run carries a reason: {:?}", result.reason);
}

/// Asserts that the run was rejected at `stage` with `reason`.
pub fn assert_rejected(result: &PipelineResult, stage: &str, reason: &str) {
    assert_status(result, PipelineStatus::Rejected);
    assert_eq!(result.stopped_at_stage.as_deref(), Some(stage), "Rejected at the wrong stage");
    assert_eq!(result.reason.as_deref(), Some(reason), "Unexpected rejection reason");
}

/// Asserts the `(stage, outcome)` sequence of a history.
pub fn assert_history_outcomes(history: &[HistoryEntry], expected: &[(&str, StageOutcome)]) {
    let actual: Vec<(&str, StageOutcome)> = history
        .iter()
        .map(|entry| (entry.stage.as_str(), entry.outcome))
        .collect();
    assert_eq!(actual, expected, "History outcomes differ");
}

/// Asserts that history timestamps never go backwards.
pub fn assert_history_ordered(history: &[HistoryEntry]) {
    for pair in history.windows(2) {
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "History entry for '{}' precedes '{}'",
            pair[1].stage,
            pair[0].stage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_assertions() {
        let history = vec![
            HistoryEntry::new("fetch", 1, StageOutcome::Completed, "ok"),
            HistoryEntry::new("parse", 1, StageOutcome::Modified, "fix"),
            HistoryEntry::new("parse", 2, StageOutcome::Completed, "ok"),
        ];
        assert_history_outcomes(
            &history,
            &[
                ("fetch", StageOutcome::Completed),
                ("parse", StageOutcome::Modified),
                ("parse", StageOutcome::Completed),
            ],
        );
        assert_history_ordered(&history);
    }

    #[test]
    #[should_panic(expected = "History outcomes differ")]
    fn test_history_mismatch_panics() {
        let history = vec![HistoryEntry::new("fetch", 1, StageOutcome::Rejected, "no")];
        assert_history_outcomes(&history, &[("fetch", StageOutcome::Completed)]);
    }
}
