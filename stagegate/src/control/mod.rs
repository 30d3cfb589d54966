//! Control points and the coordinator that resolves them.
//!
//! This module provides:
//! - ControlPoint snapshots
//! - ControlPointCoordinator for creating, resolving and awaiting points
//! - Typed bus message content for announcements and decisions
//! - AutoApprover, a policy-driven decision-maker

mod auto;
mod coordinator;
mod messages;
mod point;

pub use auto::{ApproveAll, AutoApprover, DecisionPolicy, FnPolicy};
pub use coordinator::{ControlPointCoordinator, CoordinatorConfig, SubmitOutcome};
pub use messages::{ControlPointOpened, ControlPointResolved, DecisionMessage};
pub use point::{ControlPoint, Resolution, ResolutionSource};
