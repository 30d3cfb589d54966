//! The staged execution engine.
//!
//! Runs an ordered list of stages. After every stage the run parks on a
//! control point until a decision, a timeout or a cancellation resolves it.

use super::config::{CleanupPolicy, EngineConfig, RunOptions};
use super::result::{PipelineResult, RunHandle};
use super::spec::{validate_stages, StageSpec};
use crate::bus::{MessageBus, MessageHandler, SubscriptionHandle};
use crate::cancellation::{CancellationToken, CleanupGuard};
use crate::context::{ContextSnapshot, PipelineContext, RunIdentity, StageContext};
use crate::control::{ControlPointCoordinator, Resolution, ResolutionSource};
use crate::core::{
    topics, Decision, DecisionKind, HistoryEntry, Message, MessageKind, PipelineStatus, StageOutcome,
    CANCELLED_REASON,
};
use crate::errors::GateError;
use crate::utils::{iso_timestamp, overlay, summarize_keys, Payload};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

struct ActiveRun {
    identity: RunIdentity,
    token: Arc<CancellationToken>,
    snapshots: watch::Receiver<ContextSnapshot>,
}

/// State owned by the task driving one run.
struct RunState {
    ctx: PipelineContext,
    token: Arc<CancellationToken>,
    decision_timeout: Duration,
    started: Instant,
    outputs: HashMap<String, Payload>,
    _guard: CleanupGuard,
}

/// How one stage ended.
enum StageEnd {
    Proceeded(Payload),
    Stopped(PipelineResult),
}

/// Drives gated pipeline runs.
pub struct StagedEngine {
    bus: Arc<MessageBus>,
    coordinator: Arc<ControlPointCoordinator>,
    config: EngineConfig,
    active: Arc<DashMap<Uuid, ActiveRun>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl StagedEngine {
    /// Creates an engine and registers it on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or if the cancellation
    /// subscription cannot be created.
    pub fn new(
        bus: Arc<MessageBus>,
        coordinator: Arc<ControlPointCoordinator>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, GateError> {
        config.validate()?;
        bus.register(config.component_id.clone());

        let engine = Arc::new(Self {
            bus: Arc::clone(&bus),
            coordinator,
            config,
            active: Arc::new(DashMap::new()),
            subscription: Mutex::new(None),
        });

        if engine.config.listen_for_cancellations {
            let listener = CancelListener {
                engine: Arc::downgrade(&engine),
            };
            let handle = bus.subscribe(
                &engine.config.component_id,
                topics::ALL_CANCELLATIONS,
                Arc::new(listener),
            )?;
            *engine.subscription.lock() = Some(handle);
        }

        Ok(engine)
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the coordinator the engine opens control points on.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<ControlPointCoordinator> {
        &self.coordinator
    }

    /// Runs `stages` in order on the calling task.
    ///
    /// Rejections, timeouts and cancellations return `Ok` with the matching
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] for an invalid stage list or
    /// pipeline id and [`GateError::StageFailed`] when a processor fails.
    pub async fn run(
        &self,
        stages: &[StageSpec],
        input: Payload,
        options: RunOptions,
    ) -> Result<PipelineResult, GateError> {
        validate_stages(stages)?;
        options.validate()?;
        let state = self.start_run(options);
        let span = run_span(state.ctx.identity());
        self.drive(state, stages, input).instrument(span).await
    }

    /// Runs `stages` on a new task.
    ///
    /// The run is registered before this returns, so it can be cancelled or
    /// inspected immediately.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] for an invalid stage list or
    /// pipeline id.
    pub fn spawn(
        self: &Arc<Self>,
        stages: Vec<StageSpec>,
        input: Payload,
        options: RunOptions,
    ) -> Result<RunHandle, GateError> {
        validate_stages(&stages)?;
        options.validate()?;
        let state = self.start_run(options);
        let identity = state.ctx.identity().clone();
        let span = run_span(&identity);
        let engine = Arc::clone(self);

        let handle = tokio::spawn(
            async move { engine.drive(state, &stages, input).await }.instrument(span),
        );
        Ok(RunHandle::new(identity, handle))
    }

    /// Cancels every active run of `pipeline_id`.
    ///
    /// Open control points of the pipeline are resolved as
    /// `Reject{reason: "cancelled"}` and released. Returns the number of
    /// runs signalled.
    pub fn cancel(&self, pipeline_id: &str) -> usize {
        let tokens: Vec<Arc<CancellationToken>> = self
            .active
            .iter()
            .filter(|run| run.identity.pipeline_id == pipeline_id)
            .map(|run| Arc::clone(&run.token))
            .collect();

        let signalled = tokens
            .iter()
            .filter(|token| token.cancel(format!("pipeline '{pipeline_id}' cancelled")))
            .count();
        let released = self.coordinator.release_pipeline(pipeline_id);

        info!(
            pipeline_id = %pipeline_id,
            runs = signalled,
            released,
            "Pipeline cancelled"
        );
        signalled
    }

    /// Returns the latest snapshot of an active run.
    #[must_use]
    pub fn snapshot(&self, request_id: Uuid) -> Option<ContextSnapshot> {
        self.active
            .get(&request_id)
            .map(|run| run.snapshots.borrow().clone())
    }

    /// Returns a receiver that observes every snapshot of an active run.
    #[must_use]
    pub fn watch(&self, request_id: Uuid) -> Option<watch::Receiver<ContextSnapshot>> {
        self.active.get(&request_id).map(|run| run.snapshots.clone())
    }

    /// Lists the identities of all active runs.
    #[must_use]
    pub fn active_runs(&self) -> Vec<RunIdentity> {
        self.active.iter().map(|run| run.identity.clone()).collect()
    }

    /// Stops listening for cancellation messages.
    pub fn shutdown(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            self.bus.unsubscribe(&handle);
        }
    }

    fn start_run(&self, options: RunOptions) -> RunState {
        let identity = options
            .pipeline_id
            .map_or_else(RunIdentity::new, RunIdentity::with_pipeline_id);
        let ctx = PipelineContext::new(identity.clone(), options.metadata);
        let token = Arc::new(CancellationToken::new());
        {
            let coordinator = Arc::clone(&self.coordinator);
            let pipeline_id = identity.pipeline_id.clone();
            token.on_cancel(move |reason| {
                let resolved = coordinator.cancel_pipeline(&pipeline_id);
                debug!(pipeline_id = %pipeline_id, reason, resolved = resolved.len(), "Open control points cancelled");
            });
        }

        self.active.insert(
            identity.request_id,
            ActiveRun {
                identity: identity.clone(),
                token: Arc::clone(&token),
                snapshots: ctx.subscribe(),
            },
        );
        let active = Arc::clone(&self.active);
        let request_id = identity.request_id;
        let guard = CleanupGuard::new(move || {
            active.remove(&request_id);
        });

        RunState {
            ctx,
            token,
            decision_timeout: options
                .decision_timeout
                .unwrap_or_else(|| self.config.decision_timeout()),
            started: Instant::now(),
            outputs: HashMap::new(),
            _guard: guard,
        }
    }

    async fn drive(
        &self,
        mut state: RunState,
        stages: &[StageSpec],
        input: Payload,
    ) -> Result<PipelineResult, GateError> {
        info!(stages = stages.len(), "Pipeline started");
        state.ctx.transition(PipelineStatus::Running);

        let mut next_input = input;
        for spec in stages {
            match self.run_stage(&mut state, spec, next_input).await? {
                StageEnd::Proceeded(output) => {
                    state.outputs.insert(spec.name.clone(), output.clone());
                    next_input = output;
                }
                StageEnd::Stopped(result) => return Ok(result),
            }
        }

        if state.token.is_cancelled() {
            return Ok(self.finish_cancelled(&mut state, None, 0));
        }

        state.ctx.transition(PipelineStatus::Completed);
        self.release_all(&mut state.ctx);
        let duration_ms = elapsed_ms(state.started);
        info!(duration_ms, "Pipeline completed");

        self.emit_status(&state.ctx, "Pipeline completed");
        self.publish(
            Message::new(
                topics::completion(state.ctx.pipeline_id()),
                MessageKind::Completion,
                &self.config.component_id,
            )
            .with_content(self.base_content(&state.ctx))
            .add_content("message", json!("Pipeline completed"))
            .add_content("outputs", json!(state.outputs))
            .add_content("duration_ms", json!(duration_ms)),
        );

        Ok(PipelineResult {
            identity: state.ctx.identity().clone(),
            status: PipelineStatus::Completed,
            final_output: Some(next_input),
            outputs: std::mem::take(&mut state.outputs),
            reason: None,
            stopped_at_stage: None,
            history: state.ctx.history().to_vec(),
            duration_ms,
        })
    }

    /// Runs one stage until its control point proceeds or the run stops.
    async fn run_stage(
        &self,
        state: &mut RunState,
        spec: &StageSpec,
        input: Payload,
    ) -> Result<StageEnd, GateError> {
        state.ctx.enter_stage(&spec.name);
        let mut stage_input = input;
        let mut attempt = 0;

        loop {
            attempt += 1;
            state.ctx.transition(PipelineStatus::Running);
            self.emit_status(
                &state.ctx,
                &format!("Running stage '{}' (attempt {attempt})", spec.name),
            );

            let stage_ctx = StageContext::new(
                state.ctx.identity().clone(),
                Arc::clone(state.ctx.metadata()),
                &spec.name,
                attempt,
                Arc::clone(&state.token),
            );
            let processing = AssertUnwindSafe(spec.processor.process(&stage_ctx, stage_input.clone()))
                .catch_unwind()
                .instrument(info_span!("stage", stage = %spec.name, attempt));

            let processed = tokio::select! {
                biased;
                () = state.token.cancelled() => None,
                outcome = processing => Some(outcome),
            };

            let output = match processed {
                None => {
                    let result = self.finish_cancelled(state, Some(spec.name.as_str()), attempt);
                    return Ok(StageEnd::Stopped(result));
                }
                Some(Ok(Ok(output))) => output,
                Some(Ok(Err(e))) => return Err(self.fail_stage(state, spec, attempt, format!("{e:#}"))),
                Some(Err(_)) => {
                    return Err(self.fail_stage(state, spec, attempt, "stage processor panicked".to_string()));
                }
            };
            debug!(stage = %spec.name, attempt, output = %summarize_keys(&output), "Stage produced output");

            let resolution = self.await_decision(state, spec, attempt, &output).await?;

            if state.token.is_cancelled() || resolution.is_cancellation() {
                let result = self.finish_cancelled(state, Some(spec.name.as_str()), attempt);
                return Ok(StageEnd::Stopped(result));
            }

            let decision = resolution.decision;
            match decision.kind {
                DecisionKind::Proceed => {
                    state.ctx.record(HistoryEntry::new(
                        &spec.name,
                        attempt,
                        StageOutcome::Completed,
                        format!("proceeded by {}", decision.decided_by),
                    ));
                    state.ctx.transition(PipelineStatus::Running);
                    return Ok(StageEnd::Proceeded(output));
                }
                DecisionKind::Modify => {
                    state.ctx.record(HistoryEntry::new(
                        &spec.name,
                        attempt,
                        StageOutcome::Modified,
                        format!(
                            "modified by {}: {}",
                            decision.decided_by,
                            summarize_keys(&decision.details)
                        ),
                    ));
                    stage_input = overlay(&stage_input, &decision.details);
                    info!(stage = %spec.name, attempt, "Re-running stage with modified input");
                }
                DecisionKind::Reject => {
                    let result = self.finish_rejected(state, &spec.name, attempt, &decision);
                    return Ok(StageEnd::Stopped(result));
                }
            }
        }
    }

    /// Opens the stage's control point and waits for it to resolve.
    async fn await_decision(
        &self,
        state: &mut RunState,
        spec: &StageSpec,
        attempt: u32,
        output: &Payload,
    ) -> Result<Resolution, GateError> {
        let mut payload = Payload::new();
        payload.insert("request_id".to_string(), json!(state.ctx.request_id().to_string()));
        payload.insert("stage".to_string(), json!(spec.name));
        payload.insert("attempt".to_string(), json!(attempt));
        payload.insert("output".to_string(), json!(output));
        payload.insert("metadata".to_string(), json!(state.ctx.metadata().as_ref()));

        let id = self.coordinator.create_control_point(
            state.ctx.pipeline_id(),
            &spec.name,
            payload,
            spec.allowed.clone(),
        );
        state.ctx.track_control_point(id);
        state.ctx.transition(PipelineStatus::AwaitingDecision);
        self.emit_status(
            &state.ctx,
            &format!("Awaiting decision for stage '{}'", spec.name),
        );

        let waited = tokio::select! {
            biased;
            () = state.token.cancelled() => Ok(self
                .coordinator
                .resolve_system(id, Decision::cancelled(), ResolutionSource::Cancellation)
                .unwrap_or_else(Resolution::cancelled)),
            waited = self.coordinator.wait_for_resolution(id, state.decision_timeout) => waited,
        };

        let resolution = match waited {
            Ok(resolution) => resolution,
            Err(e) if state.token.is_cancelled() => {
                debug!(control_point = %id, error = %e, "Control point gone after cancellation");
                Resolution::cancelled()
            }
            Err(e) => {
                error!(control_point = %id, error = %e, "Decision wait failed");
                state.ctx.transition(PipelineStatus::Running);
                state.ctx.fail(e.to_string());
                self.release_all(&mut state.ctx);
                self.emit_status(&state.ctx, &e.to_string());
                return Err(e);
            }
        };

        if resolution.is_timeout() {
            warn!(stage = %spec.name, attempt, "No decision before timeout");
        }
        if self.config.cleanup_policy == CleanupPolicy::Immediate {
            self.coordinator.cleanup(id);
            state.ctx.untrack_control_point(id);
        }
        Ok(resolution)
    }

    fn fail_stage(&self, state: &mut RunState, spec: &StageSpec, attempt: u32, message: String) -> GateError {
        error!(stage = %spec.name, attempt, error = %message, "Stage failed");
        state.ctx.record(HistoryEntry::new(&spec.name, attempt, StageOutcome::Errored, &message));
        state.ctx.fail(&message);
        self.release_all(&mut state.ctx);

        let err = GateError::stage_failed(state.ctx.pipeline_id(), state.ctx.request_id(), &spec.name, message);
        let mut content = self.base_content(&state.ctx);
        content.extend(err.to_payload());
        self.publish(
            Message::new(
                topics::error(state.ctx.pipeline_id()),
                MessageKind::Error,
                &self.config.component_id,
            )
            .with_content(content),
        );
        self.emit_status(&state.ctx, &format!("Stage '{}' failed", spec.name));
        err
    }

    fn finish_rejected(&self, state: &mut RunState, stage: &str, attempt: u32, decision: &Decision) -> PipelineResult {
        let reason = decision.reason().unwrap_or("rejected").to_string();
        state.ctx.record(HistoryEntry::new(
            stage,
            attempt,
            StageOutcome::Rejected,
            format!("rejected by {}: {reason}", decision.decided_by),
        ));
        state.ctx.transition(PipelineStatus::Rejected);
        self.release_all(&mut state.ctx);

        info!(stage = %stage, reason = %reason, decided_by = %decision.decided_by, "Pipeline rejected");
        self.emit_status(&state.ctx, &format!("Stage '{stage}' rejected: {reason}"));
        self.stopped_result(state, PipelineStatus::Rejected, reason, Some(stage))
    }

    fn finish_cancelled(&self, state: &mut RunState, stage: Option<&str>, attempt: u32) -> PipelineResult {
        if let Some(stage) = stage {
            state.ctx.record(HistoryEntry::new(stage, attempt, StageOutcome::Cancelled, CANCELLED_REASON));
        }
        state.ctx.transition(PipelineStatus::Cancelled);
        self.release_all(&mut state.ctx);

        info!(stage = ?stage, detail = ?state.token.reason(), "Pipeline cancelled");
        self.emit_status(&state.ctx, "Pipeline cancelled");
        self.stopped_result(state, PipelineStatus::Cancelled, CANCELLED_REASON.to_string(), stage)
    }

    fn stopped_result(
        &self,
        state: &mut RunState,
        status: PipelineStatus,
        reason: String,
        stage: Option<&str>,
    ) -> PipelineResult {
        PipelineResult {
            identity: state.ctx.identity().clone(),
            status,
            outputs: std::mem::take(&mut state.outputs),
            final_output: None,
            reason: Some(reason),
            stopped_at_stage: stage.map(str::to_string),
            history: state.ctx.history().to_vec(),
            duration_ms: elapsed_ms(state.started),
        }
    }

    fn release_all(&self, ctx: &mut PipelineContext) {
        for id in ctx.take_control_points() {
            self.coordinator.cleanup(id);
        }
    }

    fn base_content(&self, ctx: &PipelineContext) -> Payload {
        let mut content = Payload::new();
        content.insert("pipeline_id".to_string(), json!(ctx.pipeline_id()));
        content.insert("request_id".to_string(), json!(ctx.request_id().to_string()));
        content.insert("stage".to_string(), json!(ctx.current_stage()));
        content.insert("status".to_string(), json!(ctx.status()));
        content.insert("timestamp".to_string(), json!(iso_timestamp()));
        content
    }

    fn emit_status(&self, ctx: &PipelineContext, message: &str) {
        self.publish(
            Message::new(
                topics::status_update(ctx.pipeline_id()),
                MessageKind::StatusUpdate,
                &self.config.component_id,
            )
            .with_content(self.base_content(ctx))
            .add_content("message", json!(message)),
        );
    }

    fn publish(&self, message: Message) {
        let topic = message.topic.clone();
        let delivered = self.bus.publish(message);
        debug!(topic = %topic, delivered, "Published");
    }
}

impl std::fmt::Debug for StagedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedEngine")
            .field("component_id", &self.config.component_id)
            .field("active_runs", &self.active.len())
            .finish_non_exhaustive()
    }
}

fn run_span(identity: &RunIdentity) -> tracing::Span {
    info_span!(
        "pipeline",
        pipeline_id = %identity.pipeline_id,
        request_id = %identity.request_id
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Turns `cancel.<pipeline_id>` messages into [`StagedEngine::cancel`] calls.
struct CancelListener {
    engine: Weak<StagedEngine>,
}

#[async_trait]
impl MessageHandler for CancelListener {
    async fn handle(&self, message: Message) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if message.kind != MessageKind::CancelRequest {
            debug!(topic = %message.topic, kind = %message.kind, "Ignoring non-cancel message");
            return;
        }
        let pipeline_id = message
            .content_str("pipeline_id")
            .or_else(|| message.topic.strip_prefix("cancel."));
        match pipeline_id {
            Some(pipeline_id) => {
                engine.cancel(pipeline_id);
            }
            None => warn!(topic = %message.topic, "Cancel request without a pipeline id"),
        }
    }
}
