//! Broadcast emitters.
//!
//! Write paths call these after their write commits. Every emission reads
//! current state from the store, publishes on the bus, and falls back to
//! local fan-out for per-poll messages when the bus is unavailable. Global
//! lifecycle messages have no fallback and are dropped. Nothing here returns
//! an error to the caller.

use std::sync::Arc;

use quickpoll_bus::MessageBus;
use tracing::{debug, info, warn};

use crate::fanout::LocalFanoutRegistry;
use crate::message::BroadcastMessage;
use crate::poll::model::Poll;
use crate::poll::PollStore;

/// How a single emission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published on the message bus.
    Bus,
    /// Bus unavailable; queued on this many local connections.
    LocalFanout(usize),
    /// Bus unavailable and the channel has no fallback.
    Dropped,
    /// Nothing to send (unknown poll, or the store or serializer failed).
    Skipped,
}

/// Delivery used when the bus rejects a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    LocalFanout,
    Drop,
}

/// Single entry point for every broadcast in the process.
pub struct Broadcaster {
    bus: Arc<dyn MessageBus>,
    registry: Arc<LocalFanoutRegistry>,
    store: Arc<dyn PollStore>,
}

impl Broadcaster {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<LocalFanoutRegistry>,
        store: Arc<dyn PollStore>,
    ) -> Self {
        Self { bus, registry, store }
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<LocalFanoutRegistry> {
        &self.registry
    }

    /// Announce a newly created poll on the global channel.
    pub async fn emit_poll_created(&self, poll: &Poll) -> Delivery {
        self.dispatch(BroadcastMessage::new_poll(poll), Fallback::Drop).await
    }

    /// Announce a deleted poll on the global channel.
    pub async fn emit_poll_deleted(&self, poll_id: &str) -> Delivery {
        self.dispatch(BroadcastMessage::delete_poll(poll_id), Fallback::Drop).await
    }

    /// Publish the current tally of `poll_id` on its channel.
    pub async fn emit_vote_update(&self, poll_id: &str) -> Delivery {
        let options = match self.store.options_with_vote_counts(poll_id).await {
            Ok(options) => options,
            Err(e) => {
                warn!(poll_id = %poll_id, error = %e, "Cannot read tally, vote update skipped");
                return Delivery::Skipped;
            }
        };
        self.dispatch(BroadcastMessage::vote_tally(poll_id, options), Fallback::LocalFanout)
            .await
    }

    /// Publish the current like count of `poll_id` on its channel.
    pub async fn emit_like_update(&self, poll_id: &str) -> Delivery {
        let likes = match self.store.like_count(poll_id).await {
            Ok(likes) => likes,
            Err(e) => {
                warn!(poll_id = %poll_id, error = %e, "Cannot read like count, like update skipped");
                return Delivery::Skipped;
            }
        };
        self.dispatch(BroadcastMessage::like_update(poll_id, likes), Fallback::LocalFanout)
            .await
    }

    async fn dispatch(&self, message: BroadcastMessage, fallback: Fallback) -> Delivery {
        let kind = message.kind();
        let channel = message.channel();
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(kind, channel = %channel, error = %e, "Failed to serialize broadcast message");
                return Delivery::Skipped;
            }
        };

        let err = match self.bus.publish(&channel, &payload).await {
            Ok(()) => {
                debug!(kind, channel = %channel, "Broadcast published on bus");
                return Delivery::Bus;
            }
            Err(e) => e,
        };

        match (fallback, message.poll_id()) {
            (Fallback::LocalFanout, Some(poll_id)) => {
                info!(kind, channel = %channel, error = %err, "Bus unavailable, using local fan-out");
                Delivery::LocalFanout(self.registry.deliver(poll_id, &payload))
            }
            _ => {
                warn!(kind, channel = %channel, error = %err, "Bus unavailable, broadcast dropped");
                Delivery::Dropped
            }
        }
    }
}
