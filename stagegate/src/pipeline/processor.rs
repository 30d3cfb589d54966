//! The stage processor contract and closure adapters.

use crate::context::StageContext;
use crate::utils::Payload;
use async_trait::async_trait;
use std::future::Future;

/// The business logic of one stage.
///
/// Processors receive a read-only [`StageContext`] and the stage input and
/// return the stage output. They cannot change the run's status or history.
/// Returning an error fails the run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// Processes one stage attempt.
    async fn process(&self, ctx: &StageContext, input: Payload) -> anyhow::Result<Payload>;
}

/// Adapts a synchronous closure into a [`StageProcessor`].
pub struct FnProcessor<F>
where
    F: Fn(&StageContext, Payload) -> anyhow::Result<Payload> + Send + Sync,
{
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&StageContext, Payload) -> anyhow::Result<Payload> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> StageProcessor for FnProcessor<F>
where
    F: Fn(&StageContext, Payload) -> anyhow::Result<Payload> + Send + Sync,
{
    async fn process(&self, ctx: &StageContext, input: Payload) -> anyhow::Result<Payload> {
        (self.func)(ctx, input)
    }
}

/// Adapts an async closure into a [`StageProcessor`].
///
/// The closure receives an owned copy of the stage context.
pub struct AsyncFnProcessor<F, Fut>
where
    F: Fn(StageContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Payload>> + Send,
{
    func: F,
}

impl<F, Fut> AsyncFnProcessor<F, Fut>
where
    F: Fn(StageContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Payload>> + Send,
{
    /// Wraps an async closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StageProcessor for AsyncFnProcessor<F, Fut>
where
    F: Fn(StageContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Payload>> + Send,
{
    async fn process(&self, ctx: &StageContext, input: Payload) -> anyhow::Result<Payload> {
        (self.func)(ctx.clone(), input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_processor() {
        let processor = FnProcessor::new(|ctx: &StageContext, mut input: Payload| {
            input.insert("stage".to_string(), json!(ctx.stage_name()));
            Ok(input)
        });
        let output = processor
            .process(&StageContext::detached("parse"), Payload::new())
            .await
            .unwrap();
        assert_eq!(output["stage"], json!("parse"));
    }

    #[tokio::test]
    async fn test_async_fn_processor() {
        let processor = AsyncFnProcessor::new(|ctx: StageContext, _input: Payload| async move {
            tokio::task::yield_now().await;
            let mut output = Payload::new();
            output.insert("attempt".to_string(), json!(ctx.attempt()));
            Ok(output)
        });
        let output = processor
            .process(&StageContext::detached("load"), Payload::new())
            .await
            .unwrap();
        assert_eq!(output["attempt"], json!(1));
    }

    #[tokio::test]
    async fn test_processor_error() {
        let processor = FnProcessor::new(|_: &StageContext, _: Payload| Err(anyhow::anyhow!("broken input")));
        let err = processor
            .process(&StageContext::detached("parse"), Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "broken input");
    }
}
