//! Automatic decision-maker component.
//!
//! Listens for opened control points and answers them according to a
//! [`DecisionPolicy`]. Useful for unattended runs and tests.

use super::messages::{ControlPointOpened, DecisionMessage};
use crate::bus::{MessageBus, MessageHandler, SubscriptionHandle};
use crate::core::{topics, Decision, Message};
use crate::errors::GateError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chooses a decision for an opened control point.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Returns the decision, or `None` to leave the point to someone else.
    async fn decide(&self, opened: &ControlPointOpened) -> Option<Decision>;
}

/// Proceeds on every control point.
#[derive(Debug, Clone)]
pub struct ApproveAll {
    decided_by: String,
}

impl ApproveAll {
    /// Creates the policy.
    #[must_use]
    pub fn new(decided_by: impl Into<String>) -> Self {
        Self {
            decided_by: decided_by.into(),
        }
    }
}

#[async_trait]
impl DecisionPolicy for ApproveAll {
    async fn decide(&self, _opened: &ControlPointOpened) -> Option<Decision> {
        Some(Decision::proceed(self.decided_by.clone()))
    }
}

/// Adapts a closure into a [`DecisionPolicy`].
pub struct FnPolicy<F>
where
    F: Fn(&ControlPointOpened) -> Option<Decision> + Send + Sync,
{
    func: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&ControlPointOpened) -> Option<Decision> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> DecisionPolicy for FnPolicy<F>
where
    F: Fn(&ControlPointOpened) -> Option<Decision> + Send + Sync,
{
    async fn decide(&self, opened: &ControlPointOpened) -> Option<Decision> {
        (self.func)(opened)
    }
}

/// A bus component that answers opened control points automatically.
pub struct AutoApprover {
    bus: Arc<MessageBus>,
    component_id: String,
    policy: Arc<dyn DecisionPolicy>,
    delay: Option<(Duration, Duration)>,
    decided: Arc<AtomicU64>,
}

impl AutoApprover {
    /// Creates an approver. Call [`AutoApprover::start`] to attach it.
    #[must_use]
    pub fn new(bus: Arc<MessageBus>, component_id: impl Into<String>, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self {
            bus,
            component_id: component_id.into(),
            policy,
            delay: None,
            decided: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delays every decision by a random duration in `[min, max]`.
    #[must_use]
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay = Some((min, max.max(min)));
        self
    }

    /// Registers the component and subscribes it to every opened control
    /// point.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created.
    pub fn start(self) -> Result<(Arc<Self>, SubscriptionHandle), GateError> {
        self.bus.register(self.component_id.clone());
        let approver = Arc::new(self);
        let handle = approver.bus.subscribe(
            &approver.component_id,
            topics::ALL_CONTROL_POINTS_OPENED,
            approver.clone(),
        )?;
        Ok((approver, handle))
    }

    /// Returns the number of decisions published.
    #[must_use]
    pub fn decided_count(&self) -> u64 {
        self.decided.load(Ordering::Relaxed)
    }

    fn pick_delay(&self) -> Option<Duration> {
        self.delay.map(|(min, max)| {
            if min == max {
                min
            } else {
                rand::thread_rng().gen_range(min..=max)
            }
        })
    }
}

#[async_trait]
impl MessageHandler for AutoApprover {
    async fn handle(&self, message: Message) {
        let opened = match ControlPointOpened::from_message(&message) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Ignoring malformed control point announcement");
                return;
            }
        };

        // Each point is answered on its own task so delays overlap.
        let bus = Arc::clone(&self.bus);
        let policy = Arc::clone(&self.policy);
        let decided = Arc::clone(&self.decided);
        let component_id = self.component_id.clone();
        let delay = self.pick_delay();

        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let Some(decision) = policy.decide(&opened).await else {
                debug!(control_point = %opened.control_point_id, "Policy abstained");
                return;
            };
            let reply = DecisionMessage::new(opened.control_point_id, &decision);
            match reply.to_message(&opened.pipeline_id, &component_id) {
                Ok(message) => {
                    bus.publish(message);
                    decided.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(control_point = %opened.control_point_id, error = %e, "Failed to publish decision"),
            }
        });
    }
}

impl std::fmt::Debug for AutoApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoApprover")
            .field("component_id", &self.component_id)
            .field("delay", &self.delay)
            .field("decided", &self.decided_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlPointCoordinator, CoordinatorConfig};
    use crate::core::DecisionKind;
    use crate::utils::Payload;

    #[tokio::test]
    async fn test_approve_all() {
        let bus = Arc::new(MessageBus::new());
        let coordinator = ControlPointCoordinator::new(Arc::clone(&bus), CoordinatorConfig::default()).unwrap();
        let (approver, _handle) = AutoApprover::new(Arc::clone(&bus), "auto", Arc::new(ApproveAll::new("bot")))
            .start()
            .unwrap();

        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());
        let decision = coordinator.wait_for_decision(id, Duration::from_secs(1)).await.unwrap();

        assert_eq!(decision.kind, DecisionKind::Proceed);
        assert_eq!(decision.decided_by, "bot");
        assert_eq!(approver.decided_count(), 1);
    }

    #[tokio::test]
    async fn test_fn_policy_by_stage() {
        let bus = Arc::new(MessageBus::new());
        let coordinator = ControlPointCoordinator::new(Arc::clone(&bus), CoordinatorConfig::default()).unwrap();
        let policy = FnPolicy::new(|opened: &ControlPointOpened| {
            (opened.stage == "load").then(|| Decision::reject("no loads today", "policy"))
        });
        let (_approver, _handle) = AutoApprover::new(Arc::clone(&bus), "auto", Arc::new(policy))
            .with_delay(Duration::from_millis(1), Duration::from_millis(5))
            .start()
            .unwrap();

        let load = coordinator.create_control_point("p1", "load", Payload::new(), DecisionKind::read_only());
        let decision = coordinator.wait_for_decision(load, Duration::from_secs(1)).await.unwrap();
        assert_eq!(decision.reason(), Some("no loads today"));

        let fetch = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());
        let resolution = coordinator.wait_for_resolution(fetch, Duration::from_millis(50)).await.unwrap();
        assert!(resolution.is_timeout());
    }
}
