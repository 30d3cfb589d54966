//! In-process topic broker.

use super::metrics::DeliveryMetrics;
use super::topic::TopicPattern;
use crate::core::Message;
use crate::errors::GateError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receives messages from a subscription.
///
/// Each subscription has its own queue and task, so a slow handler only
/// delays its own deliveries.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one delivered message.
    async fn handle(&self, message: Message);
}

/// Adapts a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F>
where
    F: Fn(Message) + Send + Sync,
{
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Message) + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) + Send + Sync,
{
    async fn handle(&self, message: Message) {
        (self.func)(message);
    }
}

/// Identifies a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    component_id: String,
    pattern: String,
}

impl SubscriptionHandle {
    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the subscribing component.
    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Returns the topic pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

struct Subscription {
    handle: SubscriptionHandle,
    pattern: TopicPattern,
    queue: mpsc::UnboundedSender<Message>,
}

/// Topic-based publish/subscribe bus shared by every component of a process.
///
/// Delivery is in-process and best-effort. Messages to one subscriber keep
/// publish order; there is no ordering across subscribers.
#[derive(Default)]
pub struct MessageBus {
    components: RwLock<HashSet<String>>,
    subscriptions: RwLock<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
    metrics: Arc<DeliveryMetrics>,
}

impl MessageBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component. Returns false if it was already registered.
    pub fn register(&self, component_id: impl Into<String>) -> bool {
        let component_id = component_id.into();
        let inserted = self.components.write().insert(component_id.clone());
        if inserted {
            debug!(component = %component_id, "Component registered");
        }
        inserted
    }

    /// Removes a component and every subscription it owns.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unregister(&self, component_id: &str) -> usize {
        self.components.write().remove(component_id);

        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|_, sub| sub.handle.component_id != component_id);
        let removed = before - subscriptions.len();

        debug!(component = %component_id, removed, "Component unregistered");
        removed
    }

    /// Returns true if the component is registered.
    #[must_use]
    pub fn is_registered(&self, component_id: &str) -> bool {
        self.components.read().contains(component_id)
    }

    /// Subscribes a registered component to a topic pattern.
    ///
    /// Spawns the subscription's delivery task, so this must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnregisteredComponent`] if the component never
    /// registered, or [`GateError::InvalidTopicPattern`] for a malformed
    /// pattern.
    pub fn subscribe(
        &self,
        component_id: &str,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, GateError> {
        if !self.is_registered(component_id) {
            return Err(GateError::UnregisteredComponent {
                component_id: component_id.to_string(),
            });
        }

        let parsed = TopicPattern::parse(pattern)?;
        let handle = SubscriptionHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            component_id: component_id.to_string(),
            pattern: pattern.to_string(),
        };

        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_subscription(
            handle.clone(),
            rx,
            handler,
            Arc::clone(&self.metrics),
        ));

        self.subscriptions.write().insert(
            handle.id,
            Subscription {
                handle: handle.clone(),
                pattern: parsed,
                queue,
            },
        );

        debug!(
            component = %component_id,
            pattern = %pattern,
            subscription = handle.id,
            "Subscribed"
        );
        Ok(handle)
    }

    /// Subscribes a synchronous closure.
    ///
    /// # Errors
    ///
    /// Same as [`MessageBus::subscribe`].
    pub fn subscribe_fn<F>(
        &self,
        component_id: &str,
        pattern: &str,
        func: F,
    ) -> Result<SubscriptionHandle, GateError>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.subscribe(component_id, pattern, Arc::new(FnHandler::new(func)))
    }

    /// Removes a subscription. Messages already queued are still handled.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.subscriptions.write().remove(&handle.id).is_some();
        if removed {
            debug!(subscription = handle.id, pattern = %handle.pattern, "Unsubscribed");
        }
        removed
    }

    /// Publishes a message to every matching subscription.
    ///
    /// Returns the number of subscriptions the message was queued for. Zero
    /// is not an error.
    pub fn publish(&self, message: Message) -> usize {
        let mut matched = 0;
        {
            let subscriptions = self.subscriptions.read();
            for subscription in subscriptions.values() {
                if !message.is_addressed_to(&subscription.handle.component_id)
                    || !subscription.pattern.matches(&message.topic)
                {
                    continue;
                }
                if subscription.queue.send(message.clone()).is_ok() {
                    matched += 1;
                } else {
                    debug!(
                        subscription = subscription.handle.id,
                        "Subscriber queue closed, message skipped"
                    );
                }
            }
        }

        self.metrics.record_publish(matched);
        if matched == 0 {
            debug!(topic = %message.topic, kind = %message.kind, "No subscribers for message");
        }
        matched
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns the live subscriptions of one component.
    #[must_use]
    pub fn subscriptions_of(&self, component_id: &str) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.handle.component_id == component_id)
            .map(|sub| sub.handle.clone())
            .collect()
    }

    /// Returns the delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("components", &self.components.read().len())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

async fn run_subscription(
    handle: SubscriptionHandle,
    mut rx: mpsc::UnboundedReceiver<Message>,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<DeliveryMetrics>,
) {
    while let Some(message) = rx.recv().await {
        let topic = message.topic.clone();
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(()) => metrics.record_delivered(),
            Err(panic) => {
                metrics.record_panic();
                warn!(
                    component = %handle.component_id,
                    subscription = handle.id,
                    topic = %topic,
                    "Subscriber handler panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
    debug!(subscription = handle.id, "Subscription task finished");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic>".to_string()
    }
}
