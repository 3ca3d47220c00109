//! Redis connection management.
//!
//! The connector holds at most one cached [`ConnectionManager`]. It is created
//! on first use, probed once with `PING`, and reused until a failed publish
//! clears it. Connection failures are logged and reported as unavailable.
//! Only one connect attempt runs at a time, and after a failure no new
//! attempt starts until a short cooldown has passed.

use std::pin::pin;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{BusSubscription, MessageBus};

/// Default timeout for connecting to Redis.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause after a failed connect before the next attempt.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(1);

/// Bus error types.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Bus unavailable")]
    Unavailable,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Connect-once, fail-soft access to Redis pub/sub.
pub struct BusConnector {
    client: Option<redis::Client>,
    connect_timeout: Duration,
    retry_cooldown: Duration,
    state: StdMutex<ConnState>,
    /// Held for the length of one connect attempt.
    connecting: Mutex<()>,
}

#[derive(Default)]
struct ConnState {
    cached: Option<ConnectionManager>,
    /// Finished connect attempts, successful or not.
    attempts: u64,
    last_failure: Option<Instant>,
}

impl BusConnector {
    /// Create a connector for `redis_url`. No connection is attempted until
    /// the first [`acquire`](Self::acquire).
    ///
    /// An invalid URL is logged and leaves the connector permanently
    /// unavailable.
    pub fn new(redis_url: &str, connect_timeout: Duration) -> Self {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Invalid Redis URL, message bus disabled");
                None
            }
        };
        Self::with_client(client, connect_timeout)
    }

    /// A connector that never reaches a bus.
    pub fn disabled() -> Self {
        Self::with_client(None, DEFAULT_CONNECT_TIMEOUT)
    }

    fn with_client(client: Option<redis::Client>, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            state: StdMutex::new(ConnState::default()),
            connecting: Mutex::new(()),
        }
    }

    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached connection, connecting first if the cache is empty.
    ///
    /// Returns `None` when the bus cannot be reached. At most one connect
    /// attempt is in flight; callers queued behind it take its outcome
    /// instead of starting their own. Within the retry cooldown after a
    /// failed attempt this returns `None` without touching the network.
    pub async fn acquire(&self) -> Option<ConnectionManager> {
        let client = self.client.as_ref()?;

        let seen = {
            let state = self.lock_state();
            if let Some(conn) = &state.cached {
                return Some(conn.clone());
            }
            if self.cooling_down(&state) {
                return None;
            }
            state.attempts
        };

        let _attempt = self.connecting.lock().await;
        {
            let state = self.lock_state();
            if state.cached.is_some() || state.attempts != seen {
                return state.cached.clone();
            }
        }

        let result = self.connect(client).await;

        let mut state = self.lock_state();
        state.attempts += 1;
        match result {
            Ok(conn) => {
                info!("Connected to Redis");
                state.cached = Some(conn.clone());
                state.last_failure = None;
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to Redis, bus unavailable");
                state.last_failure = Some(Instant::now());
                None
            }
        }
    }

    fn cooling_down(&self, state: &ConnState) -> bool {
        state
            .last_failure
            .is_some_and(|at| at.elapsed() < self.retry_cooldown)
    }

    /// Drop the cached connection so the next call reconnects.
    pub fn invalidate(&self) {
        if self.lock_state().cached.take().is_some() {
            debug!("Cached Redis connection invalidated");
        }
    }

    /// Whether a connection is currently cached.
    pub fn is_connected(&self) -> bool {
        self.lock_state().cached.is_some()
    }

    async fn connect(&self, client: &redis::Client) -> BusResult<ConnectionManager> {
        let mut conn = timeout(self.connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BusError::Timeout(self.connect_timeout))??;

        // Liveness probe runs once per connection, not per call.
        let pong: String = timeout(self.connect_timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| BusError::Timeout(self.connect_timeout))??;
        debug!(reply = %pong, "Redis liveness probe succeeded");

        Ok(conn)
    }
}

#[async_trait]
impl MessageBus for BusConnector {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.acquire().await.ok_or(BusError::Unavailable)?;

        match conn.publish::<_, _, i64>(channel, payload).await {
            Ok(receivers) => {
                debug!(channel = %channel, receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Redis publish failed, resetting connection");
                self.invalidate();
                Err(BusError::Connection(e))
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> BusResult<Box<dyn BusSubscription>> {
        // Only open a pub/sub connection once the shared connection is known good.
        self.acquire().await.ok_or(BusError::Unavailable)?;
        let client = self.client.as_ref().ok_or(BusError::Unavailable)?;

        let mut pubsub = timeout(self.connect_timeout, client.get_async_pubsub())
            .await
            .map_err(|_| BusError::Timeout(self.connect_timeout))??;

        if let Err(e) = pubsub.subscribe(channel).await {
            warn!(channel = %channel, error = %e, "Redis subscribe failed, resetting connection");
            self.invalidate();
            return Err(BusError::Connection(e));
        }

        debug!(channel = %channel, "Subscribed to Redis channel");
        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub,
        }))
    }
}

/// A dedicated Redis pub/sub connection subscribed to one channel.
struct RedisSubscription {
    channel: String,
    pubsub: PubSub,
}

#[async_trait]
impl BusSubscription for RedisSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_message(&mut self) -> Option<String> {
        let mut stream = pin!(self.pubsub.on_message());
        loop {
            let msg = stream.next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(payload),
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Invalid payload on Redis channel");
                }
            }
        }
    }

    async fn unsubscribe(mut self: Box<Self>) -> BusResult<()> {
        let channel = self.channel.clone();
        self.pubsub.unsubscribe(channel.as_str()).await?;
        debug!(channel = %channel, "Unsubscribed from Redis channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts TCP connections and never answers, like a wedged Redis.
    async fn silent_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (format!("redis://{}", addr), task)
    }

    #[tokio::test]
    async fn test_disabled_connector_is_unavailable() {
        let bus = BusConnector::disabled();
        assert!(bus.acquire().await.is_none());
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.publish("polls:global", "{}").await,
            Err(BusError::Unavailable)
        ));
        assert!(bus.subscribe("polls:global").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_is_unavailable() {
        let bus = BusConnector::new("not a url", DEFAULT_CONNECT_TIMEOUT);
        assert!(bus.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_soft() {
        // Port 1 is never a Redis server; connect must fail without panicking.
        let bus = BusConnector::new("redis://127.0.0.1:1", Duration::from_millis(500))
            .with_retry_cooldown(Duration::ZERO);
        assert!(bus.acquire().await.is_none());
        assert!(!bus.is_connected());
        assert!(bus.publish("poll:p1", "{}").await.is_err());
        // The cache stays empty, so a later call tries again instead of reusing a dead handle.
        assert!(bus.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let (url, server) = silent_server().await;
        let connect_timeout = Duration::from_millis(300);
        let bus = Arc::new(BusConnector::new(&url, connect_timeout));

        let started = Instant::now();
        let subscribers: Vec<_> = (0..10)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move { bus.subscribe("poll:p1").await.is_err() })
            })
            .collect();
        let published = bus.publish("poll:p1", "{}").await;
        let elapsed = started.elapsed();

        assert!(published.is_err());
        // One attempt is a connect plus a PING, each bounded by the timeout.
        assert!(elapsed < connect_timeout * 3, "publish took {:?}", elapsed);
        for subscriber in subscribers {
            assert!(subscriber.await.unwrap());
        }
        assert!(started.elapsed() < connect_timeout * 3);
        server.abort();
    }

    #[tokio::test]
    async fn test_failed_attempt_cools_down() {
        let (url, server) = silent_server().await;
        let bus = BusConnector::new(&url, Duration::from_millis(200))
            .with_retry_cooldown(Duration::from_secs(30));
        assert!(bus.acquire().await.is_none());

        let started = Instant::now();
        assert!(bus.acquire().await.is_none());
        assert!(bus.publish("poll:p1", "{}").await.is_err());
        assert!(started.elapsed() < Duration::from_millis(100));
        server.abort();
    }
}
