//! QuickPoll Core Library
//!
//! Poll domain, broadcast emitters, local fan-out and subscriber bridges.

pub mod bridge;
pub mod config;
pub mod emitter;
pub mod error;
pub mod fanout;
pub mod message;
pub mod poll;

pub use bridge::{BridgeOptions, BridgeState, BridgeTarget, ClientClosed, ClientConnection, SubscriberBridge};
pub use config::{BroadcastConfig, BusBackend};
pub use emitter::{Broadcaster, Delivery};
pub use error::{QuickPollError, QuickPollResult};
pub use fanout::{ClientHandle, LocalFanoutRegistry};
pub use message::BroadcastMessage;
pub use poll::{MemoryPollStore, PollStore};
