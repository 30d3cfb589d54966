//! Delivery counters for the message bus.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters describing bus traffic.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Messages passed to `publish`.
    published: AtomicU64,
    /// Messages queued to a subscriber.
    queued: AtomicU64,
    /// Handler invocations that returned normally.
    delivered: AtomicU64,
    /// Published messages no subscription matched.
    unmatched: AtomicU64,
    /// Handler invocations that panicked.
    panicked: AtomicU64,
    /// Last publish time.
    last_publish_time: RwLock<Option<Instant>>,
}

impl DeliveryMetrics {
    /// Records a publish call and how many subscriptions it reached.
    pub fn record_publish(&self, matched: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if matched == 0 {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queued.fetch_add(matched as u64, Ordering::Relaxed);
        }
        *self.last_publish_time.write() = Some(Instant::now());
    }

    /// Records a handler invocation that returned.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a handler invocation that panicked.
    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of published messages.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of subscriber queue insertions.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Returns the number of completed handler invocations.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of messages nobody subscribed to.
    #[must_use]
    pub fn unmatched(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Returns the number of handler panics.
    #[must_use]
    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Returns queued messages not yet handled (or lost to panics).
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.queued()
            .saturating_sub(self.delivered() + self.panicked())
    }

    /// Returns the time of the last publish, if any.
    #[must_use]
    pub fn last_publish_time(&self) -> Option<Instant> {
        *self.last_publish_time.read()
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "published": self.published(),
            "queued": self.queued(),
            "delivered": self.delivered(),
            "unmatched": self.unmatched(),
            "panicked": self.panicked(),
            "in_flight": self.in_flight(),
        })
    }
}
