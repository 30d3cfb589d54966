//! Control point coordinator.
//!
//! Owns every live control point, wakes the waiting engine task when a
//! decision arrives over the bus, and synthesizes rejections for timeouts
//! and cancellations.

use super::messages::{ControlPointOpened, ControlPointResolved, DecisionMessage};
use super::{ControlPoint, Resolution, ResolutionSource};
use crate::bus::{MessageBus, MessageHandler, SubscriptionHandle};
use crate::core::{topics, Decision, DecisionKind, Message, MessageKind};
use crate::errors::GateError;
use crate::utils::Payload;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn default_component_id() -> String {
    "control-point-coordinator".to_string()
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Component id used on the bus.
    #[serde(default = "default_component_id")]
    pub component_id: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            component_id: default_component_id(),
        }
    }
}

impl CoordinatorConfig {
    /// Sets the component id.
    #[must_use]
    pub fn with_component_id(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }
}

/// Result of submitting a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The decision resolved the control point.
    Accepted,
    /// The point was already resolved; the decision was ignored.
    AlreadyResolved,
    /// No live control point has this id.
    Unknown,
    /// The point does not allow this decision kind.
    NotAllowed,
}

impl SubmitOutcome {
    /// Returns true if the decision took effect.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

struct LivePoint {
    point: ControlPoint,
    sender: Option<oneshot::Sender<Resolution>>,
    receiver: Option<oneshot::Receiver<Resolution>>,
}

/// Registry of live control points.
pub struct ControlPointCoordinator {
    bus: Arc<MessageBus>,
    config: CoordinatorConfig,
    points: DashMap<Uuid, LivePoint>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ControlPointCoordinator {
    /// Creates a coordinator, registers it on the bus and subscribes it to
    /// every decision topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision subscription cannot be created.
    pub fn new(bus: Arc<MessageBus>, config: CoordinatorConfig) -> Result<Arc<Self>, GateError> {
        bus.register(config.component_id.clone());
        let coordinator = Arc::new(Self {
            bus: Arc::clone(&bus),
            config,
            points: DashMap::new(),
            subscription: Mutex::new(None),
        });

        let listener = DecisionListener {
            coordinator: Arc::downgrade(&coordinator),
        };
        let handle = bus.subscribe(
            &coordinator.config.component_id,
            topics::ALL_DECISIONS,
            Arc::new(listener),
        )?;
        *coordinator.subscription.lock() = Some(handle);

        info!(component = %coordinator.config.component_id, "Control point coordinator started");
        Ok(coordinator)
    }

    /// Returns the bus component id.
    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.config.component_id
    }

    /// Opens a control point and announces it on
    /// `controlpoint.opened.<pipeline_id>`.
    pub fn create_control_point(
        &self,
        pipeline_id: &str,
        stage: &str,
        payload: Payload,
        allowed_kinds: BTreeSet<DecisionKind>,
    ) -> Uuid {
        let point = ControlPoint::new(pipeline_id, stage, payload, allowed_kinds);
        let id = point.id;
        let opened = ControlPointOpened::from_point(&point);

        let (sender, receiver) = oneshot::channel();
        self.points.insert(
            id,
            LivePoint {
                point,
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );

        match opened.to_message(&self.config.component_id) {
            Ok(message) => {
                let delivered = self.bus.publish(message);
                debug!(
                    control_point = %id,
                    pipeline_id = %pipeline_id,
                    stage = %stage,
                    subscribers = delivered,
                    "Control point opened"
                );
            }
            Err(e) => warn!(control_point = %id, error = %e, "Failed to announce control point"),
        }
        id
    }

    /// Resolves an open control point with a reviewer's decision.
    ///
    /// Unknown ids, already-resolved points and disallowed kinds are logged
    /// and ignored.
    pub fn submit_decision(&self, id: Uuid, decision: Decision) -> SubmitOutcome {
        self.resolve(id, decision, ResolutionSource::Decider, true)
    }

    /// Resolves a control point with a framework decision, bypassing the
    /// allowed-kinds check.
    ///
    /// Returns the resolution that won, which is an earlier one if the point
    /// was already resolved, or `None` for an unknown id.
    pub fn resolve_system(
        &self,
        id: Uuid,
        decision: Decision,
        source: ResolutionSource,
    ) -> Option<Resolution> {
        match self.resolve(id, decision, source, false) {
            SubmitOutcome::Unknown => None,
            _ => self.points.get(&id).and_then(|live| live.point.resolution()),
        }
    }

    fn resolve(
        &self,
        id: Uuid,
        decision: Decision,
        source: ResolutionSource,
        enforce_allowed: bool,
    ) -> SubmitOutcome {
        let resolved = {
            let Some(mut live) = self.points.get_mut(&id) else {
                warn!(control_point = %id, decided_by = %decision.decided_by, "Decision for unknown control point ignored");
                return SubmitOutcome::Unknown;
            };
            if live.point.resolved {
                warn!(
                    control_point = %id,
                    kind = %decision.kind,
                    decided_by = %decision.decided_by,
                    "Decision for already resolved control point ignored"
                );
                return SubmitOutcome::AlreadyResolved;
            }
            if enforce_allowed && !live.point.allows(decision.kind) {
                warn!(
                    control_point = %id,
                    kind = %decision.kind,
                    decided_by = %decision.decided_by,
                    "Decision kind not allowed for control point"
                );
                return SubmitOutcome::NotAllowed;
            }

            live.point.resolve(decision.clone(), source);
            if let Some(sender) = live.sender.take() {
                // The waiter may already be gone; the stored decision remains.
                let _ = sender.send(Resolution::new(decision.clone(), source));
            }
            ControlPointResolved {
                control_point_id: id,
                pipeline_id: live.point.pipeline_id.clone(),
                stage: live.point.stage.clone(),
                decision,
            }
        };

        info!(
            control_point = %id,
            pipeline_id = %resolved.pipeline_id,
            kind = %resolved.decision.kind,
            decided_by = %resolved.decision.decided_by,
            "Control point resolved"
        );
        match resolved.to_message(&self.config.component_id) {
            Ok(message) => {
                self.bus.publish(message);
            }
            Err(e) => warn!(control_point = %id, error = %e, "Failed to announce resolution"),
        }
        SubmitOutcome::Accepted
    }

    /// Waits for the control point's decision.
    ///
    /// On timeout the point is resolved as `Reject{reason: "timeout"}` and
    /// that decision is returned, unless a real decision won the race.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownControlPoint`] for an unknown id and
    /// [`GateError::AlreadyAwaited`] if another task is already waiting.
    pub async fn wait_for_decision(&self, id: Uuid, timeout: Duration) -> Result<Decision, GateError> {
        self.wait_for_resolution(id, timeout)
            .await
            .map(|resolution| resolution.decision)
    }

    /// Like [`ControlPointCoordinator::wait_for_decision`], but also reports
    /// whether a decider, the timeout or a cancellation resolved the point.
    ///
    /// # Errors
    ///
    /// Same as [`ControlPointCoordinator::wait_for_decision`].
    pub async fn wait_for_resolution(&self, id: Uuid, timeout: Duration) -> Result<Resolution, GateError> {
        let receiver = {
            let mut live = self
                .points
                .get_mut(&id)
                .ok_or(GateError::UnknownControlPoint(id))?;
            match live.receiver.take() {
                Some(receiver) => receiver,
                None => return live.point.resolution().ok_or(GateError::AlreadyAwaited(id)),
            }
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(resolution)) => Ok(resolution),
            Ok(Err(_)) => {
                debug!(control_point = %id, "Control point released while waiting");
                Ok(Resolution::cancelled())
            }
            Err(_) => {
                info!(control_point = %id, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Decision wait timed out");
                Ok(self
                    .resolve_system(id, Decision::timeout(), ResolutionSource::Timeout)
                    .unwrap_or_else(|| Resolution::new(Decision::timeout(), ResolutionSource::Timeout)))
            }
        }
    }

    /// Resolves every open control point of `pipeline_id` as cancelled.
    ///
    /// Returns the ids that were resolved by this call.
    pub fn cancel_pipeline(&self, pipeline_id: &str) -> Vec<Uuid> {
        let open: Vec<Uuid> = self
            .points
            .iter()
            .filter(|live| live.point.pipeline_id == pipeline_id && !live.point.resolved)
            .map(|live| live.point.id)
            .collect();

        open.into_iter()
            .filter(|id| {
                self.resolve(*id, Decision::cancelled(), ResolutionSource::Cancellation, false)
                    .is_accepted()
            })
            .collect()
    }

    /// Releases a control point. Safe to repeat.
    pub fn cleanup(&self, id: Uuid) -> bool {
        let removed = self.points.remove(&id).is_some();
        if removed {
            debug!(control_point = %id, "Control point released");
        }
        removed
    }

    /// Releases every control point of `pipeline_id`.
    pub fn release_pipeline(&self, pipeline_id: &str) -> usize {
        let before = self.points.len();
        self.points.retain(|_, live| live.point.pipeline_id != pipeline_id);
        let released = before.saturating_sub(self.points.len());
        if released > 0 {
            debug!(pipeline_id = %pipeline_id, released, "Released pipeline control points");
        }
        released
    }

    /// Returns a copy of a live control point.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<ControlPoint> {
        self.points.get(&id).map(|live| live.point.clone())
    }

    /// Lists unresolved control points, optionally for one pipeline.
    #[must_use]
    pub fn open_control_points(&self, pipeline_id: Option<&str>) -> Vec<ControlPoint> {
        let mut open: Vec<ControlPoint> = self
            .points
            .iter()
            .filter(|live| !live.point.resolved)
            .filter(|live| pipeline_id.map_or(true, |p| live.point.pipeline_id == p))
            .map(|live| live.point.clone())
            .collect();
        open.sort_by_key(|point| point.created_at);
        open
    }

    /// Returns the number of live (unreleased) control points.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.points.len()
    }

    /// Stops listening for decisions.
    pub fn shutdown(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            self.bus.unsubscribe(&handle);
            info!(component = %self.config.component_id, "Control point coordinator stopped");
        }
    }
}

impl std::fmt::Debug for ControlPointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPointCoordinator")
            .field("component_id", &self.config.component_id)
            .field("live_count", &self.live_count())
            .finish()
    }
}

struct DecisionListener {
    coordinator: Weak<ControlPointCoordinator>,
}

#[async_trait]
impl MessageHandler for DecisionListener {
    async fn handle(&self, message: Message) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if message.kind != MessageKind::Decision {
            debug!(topic = %message.topic, kind = %message.kind, "Ignoring non-decision message");
            return;
        }
        match DecisionMessage::from_message(&message) {
            Ok(decision) => {
                let id = decision.control_point_id;
                coordinator.submit_decision(id, decision.into_decision());
            }
            Err(e) => warn!(topic = %message.topic, error = %e, "Dropping malformed decision"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CollectingObserver;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    fn setup() -> (Arc<MessageBus>, Arc<ControlPointCoordinator>) {
        let bus = Arc::new(MessageBus::new());
        let coordinator = ControlPointCoordinator::new(Arc::clone(&bus), CoordinatorConfig::default()).unwrap();
        (bus, coordinator)
    }

    #[tokio::test]
    async fn test_submit_then_wait() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());

        assert_eq!(coordinator.submit_decision(id, Decision::proceed("alice")), SubmitOutcome::Accepted);
        let decision = coordinator.wait_for_decision(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Proceed);
        assert_eq!(decision.decided_by, "alice");
    }

    #[tokio::test]
    async fn test_exactly_once_resolution() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_decision(id, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(coordinator.submit_decision(id, Decision::proceed("first")).is_accepted());
        assert_eq!(
            coordinator.submit_decision(id, Decision::reject("second", "bob")),
            SubmitOutcome::AlreadyResolved
        );

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision.decided_by, "first");
        assert_eq!(coordinator.get(id).unwrap().decision.unwrap().decided_by, "first");
    }

    #[tokio::test]
    async fn test_timeout_synthesizes_reject() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());

        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let resolution = coordinator.wait_for_resolution(id, timeout).await.unwrap();
        let elapsed = started.elapsed();

        assert!(resolution.is_timeout());
        assert_eq!(resolution.decision.reason(), Some("timeout"));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
        assert!(coordinator.get(id).unwrap().resolved);

        assert_eq!(
            coordinator.submit_decision(id, Decision::proceed("late")),
            SubmitOutcome::AlreadyResolved
        );
    }

    #[tokio::test]
    async fn test_unknown_and_already_awaited() {
        let (_bus, coordinator) = setup();
        let unknown = Uuid::new_v4();
        assert!(matches!(
            coordinator.wait_for_decision(unknown, Duration::from_millis(10)).await,
            Err(GateError::UnknownControlPoint(id)) if id == unknown
        ));
        assert_eq!(coordinator.submit_decision(unknown, Decision::proceed("x")), SubmitOutcome::Unknown);

        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());
        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_decision(id, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            coordinator.wait_for_decision(id, Duration::from_millis(10)).await,
            Err(GateError::AlreadyAwaited(_))
        ));

        coordinator.submit_decision(id, Decision::proceed("alice"));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disallowed_kind_is_ignored() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());

        assert_eq!(
            coordinator.submit_decision(id, Decision::modify(Payload::new(), "alice")),
            SubmitOutcome::NotAllowed
        );
        assert!(!coordinator.get(id).unwrap().resolved);
    }

    #[tokio::test]
    async fn test_decision_over_bus() {
        let (bus, coordinator) = setup();
        let (opened, _handle) =
            CollectingObserver::attach(&bus, "dashboard", topics::ALL_CONTROL_POINTS_OPENED).unwrap();

        let id = coordinator.create_control_point("p9", "parse", Payload::new(), DecisionKind::all());
        assert!(opened.wait_for_len(1, Duration::from_secs(1)).await);
        let announced = ControlPointOpened::from_message(&opened.messages()[0]).unwrap();
        assert_eq!(announced.control_point_id, id);

        bus.register("reviewer");
        let decision = DecisionMessage::new(id, &Decision::reject("looks wrong", "reviewer"));
        bus.publish(decision.to_message("p9", "reviewer").unwrap());

        let decision = coordinator.wait_for_decision(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Reject);
        assert_eq!(decision.reason(), Some("looks wrong"));
    }

    #[tokio::test]
    async fn test_resolution_is_announced() {
        let (bus, coordinator) = setup();
        let (resolved, _handle) = CollectingObserver::attach(&bus, "dashboard", "controlpoint.resolved.#").unwrap();

        let id = coordinator.create_control_point("p2", "load", Payload::new(), DecisionKind::read_only());
        coordinator.submit_decision(id, Decision::proceed("alice"));

        assert!(resolved.wait_for_len(1, Duration::from_secs(1)).await);
        let message = ControlPointResolved::from_message(&resolved.messages()[0]).unwrap();
        assert_eq!(message.control_point_id, id);
        assert_eq!(message.decision.decided_by, "alice");
    }

    #[tokio::test]
    async fn test_cancel_pipeline_wakes_waiter() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p3", "fetch", Payload::new(), DecisionKind::read_only());
        let other = coordinator.create_control_point("p4", "fetch", Payload::new(), DecisionKind::read_only());

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_resolution(id, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(coordinator.cancel_pipeline("p3"), vec![id]);
        assert!(coordinator.cancel_pipeline("p3").is_empty());
        assert!(waiter.await.unwrap().unwrap().is_cancellation());
        assert!(!coordinator.get(other).unwrap().resolved);

        assert_eq!(coordinator.release_pipeline("p3"), 1);
        assert_eq!(coordinator.live_count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());
        assert_eq!(coordinator.open_control_points(Some("p1")).len(), 1);
        assert!(coordinator.open_control_points(Some("other")).is_empty());

        assert!(coordinator.cleanup(id));
        assert!(!coordinator.cleanup(id));
        assert!(coordinator.get(id).is_none());
        assert_eq!(coordinator.live_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_sees_release_as_cancellation() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p1", "fetch", Payload::new(), DecisionKind::read_only());

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_resolution(id, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.cleanup(id);

        assert!(waiter.await.unwrap().unwrap().is_cancellation());
    }

    #[tokio::test]
    async fn test_decider_cannot_forge_cancellation() {
        let (bus, coordinator) = setup();
        let id = coordinator.create_control_point("p5", "fetch", Payload::new(), DecisionKind::read_only());

        bus.register("impostor");
        let forged = Decision::reject("cancelled", "system");
        bus.publish(DecisionMessage::new(id, &forged).to_message("p5", "impostor").unwrap());

        let resolution = coordinator.wait_for_resolution(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Decider);
        assert!(!resolution.is_cancellation());
        assert_eq!(resolution.decision.reason(), Some("cancelled"));
        assert_eq!(coordinator.get(id).unwrap().source, Some(ResolutionSource::Decider));
    }

    #[tokio::test]
    async fn test_resolve_system_returns_earlier_resolution() {
        let (_bus, coordinator) = setup();
        let id = coordinator.create_control_point("p6", "fetch", Payload::new(), DecisionKind::read_only());
        coordinator.submit_decision(id, Decision::proceed("alice"));

        let winner = coordinator
            .resolve_system(id, Decision::cancelled(), ResolutionSource::Cancellation)
            .unwrap();
        assert_eq!(winner.source, ResolutionSource::Decider);
        assert_eq!(winner.decision.kind, DecisionKind::Proceed);
        assert!(coordinator
            .resolve_system(Uuid::new_v4(), Decision::cancelled(), ResolutionSource::Cancellation)
            .is_none());
    }
}
