//! Core value types shared by the bus, the coordinator and the engine:
//! - Pipeline status and its state machine
//! - Decisions and decision kinds
//! - Bus messages and the topic layout
//! - History entries

mod decision;
mod history;
mod message;
mod status;

pub use decision::{Decision, DecisionKind, CANCELLED_REASON, SYSTEM_DECIDER, TIMEOUT_REASON};
pub use history::{HistoryEntry, StageOutcome};
pub use message::{topics, Message, MessageKind};
pub use status::PipelineStatus;
