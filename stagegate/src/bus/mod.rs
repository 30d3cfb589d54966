//! Topic-based publish/subscribe message bus.
//!
//! Every component of the framework talks through the bus: the engine
//! publishes status traffic, the coordinator publishes opened control points
//! and consumes decisions, and decision-makers and observers subscribe to
//! whatever topics they care about.

mod broker;
mod metrics;
mod observers;
mod topic;

pub use broker::{FnHandler, MessageBus, MessageHandler, SubscriptionHandle};
pub use metrics::DeliveryMetrics;
pub use observers::{CollectingObserver, LoggingObserver};
pub use topic::{is_topic_segment, TopicPattern};
