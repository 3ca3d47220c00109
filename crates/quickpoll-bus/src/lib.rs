//! QuickPoll Message Bus
//!
//! Publish/subscribe plumbing for live poll updates. The Redis-backed
//! [`BusConnector`] connects lazily and fails soft; [`InMemoryBus`] keeps the
//! same contract inside one process.

pub mod channel;
pub mod client;
pub mod memory;

use async_trait::async_trait;

pub use channel::{poll_channel, GLOBAL_CHANNEL};
pub use client::{BusConnector, BusError, BusResult};
pub use memory::InMemoryBus;

/// A publish/subscribe transport keyed by channel name.
///
/// Every failure is reported as a [`BusError`]; callers treat any error as
/// "bus unavailable" for that single operation.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a serialized message on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()>;

    /// Open a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> BusResult<Box<dyn BusSubscription>>;
}

/// A live subscription to a single channel.
#[async_trait]
pub trait BusSubscription: Send {
    /// Channel this subscription listens on.
    fn channel(&self) -> &str;

    /// Wait for the next payload. `None` means the bus closed the subscription.
    async fn next_message(&mut self) -> Option<String>;

    /// Unsubscribe and release the underlying connection.
    async fn unsubscribe(self: Box<Self>) -> BusResult<()>;
}
