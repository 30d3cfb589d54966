//! Stage processors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::StageContext;
use crate::pipeline::StageProcessor;
use crate::utils::{overlay, Payload};

/// One recorded processor call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Stage name.
    pub stage: String,
    /// Attempt number.
    pub attempt: u32,
    /// Input the processor received.
    pub input: Payload,
    /// Metadata the processor saw.
    pub metadata: Payload,
}

/// A processor that records every call and returns its input overlaid with
/// fixed fields.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    extra: Payload,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingProcessor {
    /// Creates a pass-through recording processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to every output.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns the recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the inputs in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Payload> {
        self.calls.lock().iter().map(|call| call.input.clone()).collect()
    }
}

#[async_trait]
impl StageProcessor for RecordingProcessor {
    async fn process(&self, ctx: &StageContext, input: Payload) -> anyhow::Result<Payload> {
        self.calls.lock().push(RecordedCall {
            stage: ctx.stage_name().to_string(),
            attempt: ctx.attempt(),
            input: input.clone(),
            metadata: ctx.metadata().clone(),
        });
        Ok(overlay(&input, &self.extra))
    }
}

/// A processor that always fails.
#[derive(Debug)]
pub struct FailingProcessor {
    error: String,
    calls: AtomicUsize,
}

impl FailingProcessor {
    /// Creates a processor failing with `error`.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for FailingProcessor {
    async fn process(&self, ctx: &StageContext, _input: Payload) -> anyhow::Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!(self.error.clone()).context(format!("stage '{}'", ctx.stage_name())))
    }
}

/// A processor that sleeps before passing its input through.
#[derive(Debug)]
pub struct SlowProcessor {
    delay: Duration,
    finished: AtomicUsize,
}

impl SlowProcessor {
    /// Creates a slow processor.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            finished: AtomicUsize::new(0),
        }
    }

    /// Creates a slow processor with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Returns how many calls ran to completion.
    #[must_use]
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for SlowProcessor {
    async fn process(&self, _ctx: &StageContext, input: Payload) -> anyhow::Result<Payload> {
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(input)
    }
}

/// A processor that panics.
#[derive(Debug, Default)]
pub struct PanickingProcessor;

#[async_trait]
impl StageProcessor for PanickingProcessor {
    async fn process(&self, ctx: &StageContext, _input: Payload) -> anyhow::Result<Payload> {
        panic!("processor for '{}' panicked", ctx.stage_name());
    }
}
