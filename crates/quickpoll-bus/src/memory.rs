//! In-process message bus.
//!
//! One tokio broadcast channel per bus channel. Used by tests and by
//! single-node deployments that run without Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::client::{BusError, BusResult};
use crate::{BusSubscription, MessageBus};

/// Default per-channel capacity.
const DEFAULT_CAPACITY: usize = 100;

/// A [`MessageBus`] that never leaves the process.
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
    available: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage. While unavailable every publish and subscribe fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn check_available(&self) -> BusResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable)
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        self.check_available()?;
        // send() only fails when nobody is subscribed, which is not an error for pub/sub.
        let receivers = self.sender(channel).send(payload.to_string()).unwrap_or(0);
        debug!(channel = %channel, receivers, "Published to in-memory bus");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BusResult<Box<dyn BusSubscription>> {
        self.check_available()?;
        let rx = self.sender(channel).subscribe();
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx,
        }))
    }
}

struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_message(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> BusResult<()> {
        debug!(channel = %self.channel, "Unsubscribed from in-memory bus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe("poll:p1").await.unwrap();
        let mut b = bus.subscribe("poll:p1").await.unwrap();

        bus.publish("poll:p1", "one").await.unwrap();
        bus.publish("poll:p1", "two").await.unwrap();

        assert_eq!(a.next_message().await.as_deref(), Some("one"));
        assert_eq!(a.next_message().await.as_deref(), Some("two"));
        assert_eq!(b.next_message().await.as_deref(), Some("one"));
        assert_eq!(b.next_message().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemoryBus::new();
        let mut p2 = bus.subscribe("poll:p2").await.unwrap();

        bus.publish("poll:p1", "for p1").await.unwrap();
        bus.publish("poll:p2", "for p2").await.unwrap();

        assert_eq!(p2.next_message().await.as_deref(), Some("for p2"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        assert!(bus.publish("polls:global", "{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_outage_fails_publish_and_subscribe() {
        let bus = InMemoryBus::new();
        bus.set_available(false);
        assert!(matches!(bus.publish("poll:p1", "x").await, Err(BusError::Unavailable)));
        assert!(bus.subscribe("poll:p1").await.is_err());

        bus.set_available(true);
        assert!(bus.publish("poll:p1", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_receiver() {
        let bus = InMemoryBus::new();
        let sub = bus.subscribe("poll:p1").await.unwrap();
        assert_eq!(bus.subscriber_count("poll:p1"), 1);
        sub.unsubscribe().await.unwrap();
        assert_eq!(bus.subscriber_count("poll:p1"), 0);
    }
}
