//! Passive subscribers: logging and collecting observers.

use super::broker::{MessageBus, MessageHandler, SubscriptionHandle};
use super::topic::TopicPattern;
use crate::core::{Message, MessageKind};
use crate::errors::GateError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, Level};

/// An observer that logs every delivered message using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingObserver {
    /// Creates a new logging observer with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging observer.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging observer.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_message(&self, message: &Message) {
        if self.level == Level::DEBUG {
            debug!(
                topic = %message.topic,
                kind = %message.kind,
                source = %message.source_component,
                content = ?message.content,
                "Bus message: {}", message.topic
            );
        } else {
            info!(
                topic = %message.topic,
                kind = %message.kind,
                source = %message.source_component,
                content = ?message.content,
                "Bus message: {}", message.topic
            );
        }
    }
}

#[async_trait]
impl MessageHandler for LoggingObserver {
    async fn handle(&self, message: Message) {
        self.log_message(&message);
    }
}

/// An observer that stores every delivered message, for tests and dashboards.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    messages: RwLock<Vec<Message>>,
    arrived: Notify,
}

impl CollectingObserver {
    /// Creates a new collecting observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `component_id` on the bus and subscribes a new observer to
    /// `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    pub fn attach(
        bus: &MessageBus,
        component_id: &str,
        pattern: &str,
    ) -> Result<(Arc<Self>, SubscriptionHandle), GateError> {
        let observer = Arc::new(Self::new());
        bus.register(component_id);
        let handle = bus.subscribe(component_id, pattern, observer.clone())?;
        Ok((observer, handle))
    }

    /// Returns all collected messages.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    /// Returns the number of collected messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Returns true if no messages have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Clears all collected messages.
    pub fn clear(&self) {
        self.messages.write().clear();
    }

    /// Returns messages of one kind.
    #[must_use]
    pub fn messages_of_kind(&self, kind: MessageKind) -> Vec<Message> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns messages whose topic matches `pattern`. An invalid pattern
    /// matches nothing.
    #[must_use]
    pub fn messages_matching(&self, pattern: &str) -> Vec<Message> {
        let Ok(pattern) = TopicPattern::parse(pattern) else {
            return Vec::new();
        };
        self.messages
            .read()
            .iter()
            .filter(|m| pattern.matches(&m.topic))
            .cloned()
            .collect()
    }

    /// Waits until some collected message satisfies `predicate`.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Duration) -> bool
    where
        P: Fn(&Message) -> bool,
    {
        let wait = async {
            loop {
                let arrived = self.arrived.notified();
                if self.messages.read().iter().any(&predicate) {
                    return;
                }
                arrived.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Waits until at least `count` messages have been collected.
    pub async fn wait_for_len(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let arrived = self.arrived.notified();
                if self.len() >= count {
                    return;
                }
                arrived.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl MessageHandler for CollectingObserver {
    async fn handle(&self, message: Message) {
        self.messages.write().push(message);
        self.arrived.notify_waiters();
    }
}
