//! Subscriber bridges.
//!
//! One bridge runs per client connection and relays a subscription to that
//! client until it disconnects. A bridge moves through
//! Connecting -> Subscribed -> Draining -> Closed. Draining always releases
//! both the local fan-out registration and the bus subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quickpoll_bus::{poll_channel, BusSubscription, GLOBAL_CHANNEL};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::emitter::Broadcaster;
use crate::fanout::{ClientHandle, FanoutRegistration};

/// The client went away while sending.
#[derive(Error, Debug)]
#[error("client connection closed")]
pub struct ClientClosed;

/// The sending side of one client connection.
#[async_trait]
pub trait ClientConnection: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), ClientClosed>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), ClientClosed>;
}

/// What a bridge is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeTarget {
    /// Poll lifecycle events for every poll.
    AllPolls,
    /// Vote and like updates for one poll.
    Poll(String),
}

impl BridgeTarget {
    pub fn channel(&self) -> String {
        match self {
            Self::AllPolls => GLOBAL_CHANNEL.to_string(),
            Self::Poll(poll_id) => poll_channel(poll_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Subscribed,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    pub keepalive: Duration,
    pub fanout_capacity: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from(&BroadcastConfig::default())
    }
}

impl From<&BroadcastConfig> for BridgeOptions {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            keepalive: config.keepalive(),
            fanout_capacity: config.fanout_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    SendFailed,
    Evicted,
}

pub struct SubscriberBridge<C> {
    target: BridgeTarget,
    connection: C,
    broadcaster: Arc<Broadcaster>,
    options: BridgeOptions,
    cancel: CancellationToken,
    state: BridgeState,
}

impl<C: ClientConnection> SubscriberBridge<C> {
    /// `cancel` is fired by whoever watches the client's inbound side.
    pub fn new(
        target: BridgeTarget,
        connection: C,
        broadcaster: Arc<Broadcaster>,
        options: BridgeOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            connection,
            broadcaster,
            options,
            cancel,
            state: BridgeState::Connecting,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Relay until the client disconnects, then clean up. Returns the final state.
    pub async fn run(mut self) -> BridgeState {
        let channel = self.target.channel();

        let (registration, mut local_rx) = match &self.target {
            BridgeTarget::Poll(poll_id) => {
                let (handle, rx) = ClientHandle::channel(self.options.fanout_capacity);
                let registration = self.broadcaster.registry().register_guarded(poll_id, handle);
                (Some(registration), Some(rx))
            }
            BridgeTarget::AllPolls => (None, None),
        };
        // Bus round-trips race the cancellation token from here on.
        let mut subscription = None;
        let exit = match self
            .cancel
            .run_until_cancelled(subscribe(&self.broadcaster, &channel))
            .await
        {
            None => Exit::Cancelled,
            Some(subscribed) => {
                subscription = subscribed;
                self.transition(BridgeState::Subscribed);

                // Resync so a new viewer sees current counts without waiting for a write.
                let resynced = match &self.target {
                    BridgeTarget::Poll(poll_id) => self
                        .cancel
                        .run_until_cancelled(resync(&self.broadcaster, poll_id))
                        .await
                        .is_some(),
                    BridgeTarget::AllPolls => true,
                };

                if resynced {
                    self.relay(&channel, &mut subscription, &mut local_rx).await
                } else {
                    Exit::Cancelled
                }
            }
        };
        debug!(channel = %channel, ?exit, "Bridge relay loop ended");

        self.transition(BridgeState::Draining);
        release(&channel, registration, subscription).await;
        self.transition(BridgeState::Closed);
        info!(channel = %channel, "Subscriber disconnected");
        self.state
    }

    async fn relay(
        &mut self,
        channel: &str,
        subscription: &mut Option<Box<dyn BusSubscription>>,
        local_rx: &mut Option<mpsc::Receiver<Arc<str>>>,
    ) -> Exit {
        let period = self.options.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Cancelled,

                msg = next_bus_message(subscription) => match msg {
                    Some(payload) => {
                        if let Err(e) = serde_json::from_str::<serde_json::Value>(&payload) {
                            warn!(channel = %channel, error = %e, "Malformed message on bus, skipped");
                            continue;
                        }
                        if self.connection.send_text(&payload).await.is_err() {
                            return Exit::SendFailed;
                        }
                    }
                    None => {
                        warn!(channel = %channel, "Bus subscription closed, retrying on next keepalive");
                        if let Some(closed) = subscription.take() {
                            release_subscription(channel, closed).await;
                        }
                    }
                },

                msg = next_local_message(local_rx) => match msg {
                    Some(payload) => {
                        if self.connection.send_text(&payload).await.is_err() {
                            return Exit::SendFailed;
                        }
                    }
                    // The registry drops connections that fall behind.
                    None => return Exit::Evicted,
                },

                _ = keepalive.tick() => {
                    if self.connection.send_ping().await.is_err() {
                        return Exit::SendFailed;
                    }
                    if subscription.is_none() {
                        match self
                            .cancel
                            .run_until_cancelled(subscribe(&self.broadcaster, channel))
                            .await
                        {
                            Some(subscribed) => *subscription = subscribed,
                            None => return Exit::Cancelled,
                        }
                    }
                }
            }
        }
    }

    fn transition(&mut self, next: BridgeState) {
        debug!(channel = %self.target.channel(), from = ?self.state, to = ?next, "Bridge state change");
        self.state = next;
    }
}

async fn subscribe(broadcaster: &Broadcaster, channel: &str) -> Option<Box<dyn BusSubscription>> {
    match broadcaster.bus().subscribe(channel).await {
        Ok(subscription) => {
            debug!(channel = %channel, "Bridge subscribed on bus");
            Some(subscription)
        }
        Err(e) => {
            info!(channel = %channel, error = %e, "Bus unavailable, bridge running without subscription");
            None
        }
    }
}

async fn resync(broadcaster: &Broadcaster, poll_id: &str) {
    broadcaster.emit_vote_update(poll_id).await;
    broadcaster.emit_like_update(poll_id).await;
}

/// Release both resources. The registration goes first and cannot fail.
async fn release(
    channel: &str,
    registration: Option<FanoutRegistration>,
    subscription: Option<Box<dyn BusSubscription>>,
) {
    if let Some(registration) = registration {
        debug!(channel = %channel, connection_id = %registration.connection_id(), "Leaving local fan-out");
        drop(registration);
    }
    if let Some(subscription) = subscription {
        release_subscription(channel, subscription).await;
    }
}

async fn release_subscription(channel: &str, subscription: Box<dyn BusSubscription>) {
    if let Err(e) = subscription.unsubscribe().await {
        warn!(channel = %channel, error = %e, "Failed to unsubscribe cleanly");
    }
}

async fn next_bus_message(subscription: &mut Option<Box<dyn BusSubscription>>) -> Option<String> {
    match subscription {
        Some(subscription) => subscription.next_message().await,
        None => std::future::pending().await,
    }
}

async fn next_local_message(local_rx: &mut Option<mpsc::Receiver<Arc<str>>>) -> Option<Arc<str>> {
    match local_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
