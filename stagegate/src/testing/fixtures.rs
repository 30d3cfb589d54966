//! Test harness wiring a bus, a coordinator and an engine together.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::{CollectingObserver, MessageBus, SubscriptionHandle};
use crate::control::{
    AutoApprover, ControlPoint, ControlPointCoordinator, CoordinatorConfig, DecisionMessage, DecisionPolicy,
};
use crate::core::Decision;
use crate::errors::GateError;
use crate::pipeline::{EngineConfig, StagedEngine};

/// Component id the harness publishes decisions as.
pub const TEST_REVIEWER: &str = "test-reviewer";

/// A fully wired engine plus an observer recording every bus message.
#[derive(Debug)]
pub struct TestHarness {
    /// The shared bus.
    pub bus: Arc<MessageBus>,
    /// The coordinator.
    pub coordinator: Arc<ControlPointCoordinator>,
    /// The engine.
    pub engine: Arc<StagedEngine>,
    /// Records every message published on the bus.
    pub observer: Arc<CollectingObserver>,
    observer_handle: SubscriptionHandle,
}

impl TestHarness {
    /// Creates a harness with the default engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if wiring fails.
    pub fn new() -> Result<Self, GateError> {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a harness with a custom engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if wiring fails.
    pub fn with_config(config: EngineConfig) -> Result<Self, GateError> {
        let bus = Arc::new(MessageBus::new());
        let coordinator = ControlPointCoordinator::new(Arc::clone(&bus), CoordinatorConfig::default())?;
        let engine = StagedEngine::new(Arc::clone(&bus), Arc::clone(&coordinator), config)?;
        let (observer, observer_handle) = CollectingObserver::attach(&bus, "test-observer", "#")?;
        bus.register(TEST_REVIEWER);

        Ok(Self {
            bus,
            coordinator,
            engine,
            observer,
            observer_handle,
        })
    }

    /// Starts an [`AutoApprover`] on the harness bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the approver cannot subscribe.
    pub fn auto_approve(&self, policy: Arc<dyn DecisionPolicy>) -> Result<Arc<AutoApprover>, GateError> {
        let (approver, _handle) = AutoApprover::new(Arc::clone(&self.bus), "test-approver", policy).start()?;
        Ok(approver)
    }

    /// Waits for an unresolved control point of `pipeline_id`.
    pub async fn wait_for_open_point(&self, pipeline_id: &str, timeout: Duration) -> Option<ControlPoint> {
        let poll = async {
            loop {
                if let Some(point) = self.coordinator.open_control_points(Some(pipeline_id)).into_iter().next() {
                    return point;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.ok()
    }

    /// Publishes a decision for `point` over the bus, as a reviewer would.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision cannot be serialized.
    pub fn publish_decision(&self, point: &ControlPoint, decision: &Decision) -> Result<usize, GateError> {
        let message = DecisionMessage::new(point.id, decision).to_message(&point.pipeline_id, TEST_REVIEWER)?;
        Ok(self.bus.publish(message))
    }

    /// Waits for the next open point of `pipeline_id` and decides it.
    ///
    /// Returns the decided point, or `None` if none opened in time.
    pub async fn decide_next(
        &self,
        pipeline_id: &str,
        decision: Decision,
        timeout: Duration,
    ) -> Option<ControlPoint> {
        let point = self.wait_for_open_point(pipeline_id, timeout).await?;
        self.publish_decision(&point, &decision).ok()?;
        let resolved = async {
            while self
                .coordinator
                .get(point.id)
                .is_some_and(|live| !live.resolved)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(timeout, resolved).await.ok()?;
        Some(point)
    }

    /// Detaches the observer from the bus.
    pub fn detach_observer(&self) -> bool {
        self.bus.unsubscribe(&self.observer_handle)
    }
}
