//! Gated pipeline execution.
//!
//! This module provides:
//! - The stage processor contract and closure adapters
//! - Stage specifications with per-stage decision kinds
//! - Engine configuration and per-run options
//! - The staged execution engine

mod config;
mod engine;
mod processor;
mod result;
mod spec;

pub use config::{CleanupPolicy, EngineConfig, RunOptions};
pub use engine::StagedEngine;
#[cfg(test)]
pub use processor::MockStageProcessor;
pub use processor::{AsyncFnProcessor, FnProcessor, StageProcessor};
pub use result::{PipelineResult, RunHandle};
pub use spec::{validate_stages, StageSpec};
