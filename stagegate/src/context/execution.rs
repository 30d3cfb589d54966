//! Mutable pipeline context and the read-only stage context.

use super::{ContextSnapshot, RunIdentity};
use crate::cancellation::CancellationToken;
use crate::core::{HistoryEntry, PipelineStatus};
use crate::utils::{now_utc, Payload, Timestamp};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// The mutable state of one pipeline run.
///
/// Owned by the task driving the run. Every mutation republishes a
/// [`ContextSnapshot`] on a watch channel.
pub struct PipelineContext {
    identity: RunIdentity,
    metadata: Arc<Payload>,
    status: PipelineStatus,
    current_stage: Option<String>,
    history: Vec<HistoryEntry>,
    open_control_points: Vec<Uuid>,
    error: Option<String>,
    started_at: Timestamp,
    updates: watch::Sender<ContextSnapshot>,
}

impl PipelineContext {
    /// Creates a context in `Pending`.
    #[must_use]
    pub fn new(identity: RunIdentity, metadata: Payload) -> Self {
        let started_at = now_utc();
        let metadata = Arc::new(metadata);
        let initial = ContextSnapshot {
            identity: identity.clone(),
            status: PipelineStatus::Pending,
            current_stage: None,
            metadata: (*metadata).clone(),
            history: Vec::new(),
            open_control_points: Vec::new(),
            error: None,
            started_at,
        };
        let (updates, _) = watch::channel(initial);

        Self {
            identity,
            metadata,
            status: PipelineStatus::Pending,
            current_stage: None,
            history: Vec::new(),
            open_control_points: Vec::new(),
            error: None,
            started_at,
            updates,
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.identity.request_id
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.identity.pipeline_id
    }

    /// Returns the shared metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Arc<Payload> {
        &self.metadata
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Returns the current stage, if any.
    #[must_use]
    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    /// Returns the audit trail.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Returns the open control point ids.
    #[must_use]
    pub fn open_control_points(&self) -> &[Uuid] {
        &self.open_control_points
    }

    /// Returns the last error message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns a receiver that observes every snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ContextSnapshot> {
        self.updates.subscribe()
    }

    /// Moves to `next` if the state machine allows it.
    ///
    /// Invalid transitions are logged and refused.
    pub fn transition(&mut self, next: PipelineStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            warn!(
                pipeline_id = %self.identity.pipeline_id,
                from = %self.status,
                to = %next,
                "Refusing invalid status transition"
            );
            return false;
        }
        debug!(
            pipeline_id = %self.identity.pipeline_id,
            from = %self.status,
            to = %next,
            "Status transition"
        );
        self.status = next;
        self.publish();
        true
    }

    /// Marks `stage` as the current stage.
    pub fn enter_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = Some(stage.into());
        self.publish();
    }

    /// Appends a history entry.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.publish();
    }

    /// Tracks a control point opened by this run.
    pub fn track_control_point(&mut self, id: Uuid) {
        self.open_control_points.push(id);
        self.publish();
    }

    /// Stops tracking a released control point.
    pub fn untrack_control_point(&mut self, id: Uuid) -> bool {
        let before = self.open_control_points.len();
        self.open_control_points.retain(|open| *open != id);
        let removed = self.open_control_points.len() != before;
        if removed {
            self.publish();
        }
        removed
    }

    /// Drains every tracked control point.
    pub fn take_control_points(&mut self) -> Vec<Uuid> {
        let drained = std::mem::take(&mut self.open_control_points);
        if !drained.is_empty() {
            self.publish();
        }
        drained
    }

    /// Records an error message and moves to `Errored`.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.error = Some(message.into());
        self.transition(PipelineStatus::Errored)
    }

    /// Builds a snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            identity: self.identity.clone(),
            status: self.status,
            current_stage: self.current_stage.clone(),
            metadata: (*self.metadata).clone(),
            history: self.history.clone(),
            open_control_points: self.open_control_points.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("identity", &self.identity)
            .field("status", &self.status)
            .field("current_stage", &self.current_stage)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// What a stage processor may see about its run.
///
/// Read-only: processors cannot change status, history or stage position.
#[derive(Debug, Clone)]
pub struct StageContext {
    identity: RunIdentity,
    metadata: Arc<Payload>,
    stage: String,
    attempt: u32,
    cancel_token: Arc<CancellationToken>,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(
        identity: RunIdentity,
        metadata: Arc<Payload>,
        stage: impl Into<String>,
        attempt: u32,
        cancel_token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            identity,
            metadata,
            stage: stage.into(),
            attempt,
            cancel_token,
        }
    }

    /// Creates a standalone context for calling a processor directly.
    #[must_use]
    pub fn detached(stage: impl Into<String>) -> Self {
        Self::new(
            RunIdentity::new(),
            Arc::new(Payload::new()),
            stage,
            1,
            Arc::new(CancellationToken::new()),
        )
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.identity.request_id
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.identity.pipeline_id
    }

    /// Returns the run metadata.
    #[must_use]
    pub fn metadata(&self) -> &Payload {
        &self.metadata
    }

    /// Returns a single metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }
}
