//! # Stagegate
//!
//! Control-point gated staged execution for data-ingestion pipelines.
//!
//! Stagegate runs an ordered list of stages and pauses after every stage at
//! a control point until an external decision arrives:
//!
//! - **Message bus**: in-process topic routing with `*` and `#` wildcards
//! - **Control points**: exactly-once resolution with timeouts and cancellation
//! - **Staged engine**: proceed, modify-and-rerun or reject after every stage
//! - **Observability**: status, error and completion messages plus `tracing` spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagegate::prelude::*;
//!
//! let bus = Arc::new(MessageBus::new());
//! let coordinator = ControlPointCoordinator::new(bus.clone(), CoordinatorConfig::default())?;
//! let engine = StagedEngine::new(bus.clone(), coordinator, EngineConfig::default())?;
//!
//! let stages = vec![
//!     StageSpec::from_fn("fetch", |_ctx, input| Ok(input)),
//!     StageSpec::from_fn("parse", |_ctx, input| Ok(input)).correctable(),
//! ];
//! let result = engine.run(&stages, Payload::new(), RunOptions::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bus;
pub mod cancellation;
pub mod context;
pub mod control;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{
        CollectingObserver, LoggingObserver, MessageBus, MessageHandler, SubscriptionHandle,
        TopicPattern,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::{ContextSnapshot, PipelineContext, RunIdentity, StageContext};
    pub use crate::control::{
        ApproveAll, AutoApprover, ControlPoint, ControlPointCoordinator, ControlPointOpened,
        CoordinatorConfig, DecisionMessage, DecisionPolicy, Resolution, ResolutionSource,
        SubmitOutcome,
    };
    pub use crate::core::{
        topics, Decision, DecisionKind, HistoryEntry, Message, MessageKind, PipelineStatus,
        StageOutcome,
    };
    pub use crate::errors::GateError;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        AsyncFnProcessor, CleanupPolicy, EngineConfig, FnProcessor, PipelineResult, RunHandle,
        RunOptions, StageProcessor, StageSpec, StagedEngine,
    };
    pub use crate::utils::{generate_uuid, iso_timestamp, Payload, Timestamp};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_prelude_wires_an_engine() {
        let bus = Arc::new(MessageBus::new());
        let coordinator = ControlPointCoordinator::new(Arc::clone(&bus), CoordinatorConfig::default()).unwrap();
        let engine = StagedEngine::new(Arc::clone(&bus), coordinator, EngineConfig::default()).unwrap();
        let (_approver, _handle) = AutoApprover::new(Arc::clone(&bus), "auto", Arc::new(ApproveAll::new("bot")))
            .start()
            .unwrap();

        let stages = vec![StageSpec::from_fn("fetch", |_ctx, input| Ok(input))];
        let result = engine
            .run(&stages, Payload::new(), RunOptions::new().with_decision_timeout(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result.status, PipelineStatus::Completed);
    }
}
