//! Context management for pipeline execution.
//!
//! This module provides:
//! - The run identity (request id and pipeline lineage)
//! - The mutable pipeline context owned by the engine task
//! - Immutable snapshots for observers
//! - The read-only stage context handed to processors

mod execution;
mod identity;
mod snapshot;

pub use execution::{PipelineContext, StageContext};
pub use identity::RunIdentity;
pub use snapshot::ContextSnapshot;
