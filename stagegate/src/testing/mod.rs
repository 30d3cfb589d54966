//! Testing utilities for gated pipelines.
//!
//! This module provides:
//! - Stage processors that record, fail, stall or panic
//! - Assertions for results and histories
//! - A harness wiring bus, coordinator and engine together

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed, assert_history_ordered, assert_history_outcomes, assert_rejected,
    assert_status,
};
pub use fixtures::{TestHarness, TEST_REVIEWER};
pub use mocks::{
    FailingProcessor, PanickingProcessor, RecordedCall, RecordingProcessor, SlowProcessor,
};
