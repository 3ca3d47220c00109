//! Broadcast configuration.
//!
//! Loaded from an optional TOML file; command-line flags override it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuickPollError, QuickPollResult};

/// Which message bus backs the broadcast layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    /// Redis pub/sub at `redis_url`.
    #[default]
    Redis,
    /// In-process bus; only viewers on this process are reached.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub backend: BusBackend,
    /// Redis address. Without one the Redis backend is permanently unavailable
    /// and every per-poll update goes through local fan-out.
    pub redis_url: Option<String>,
    pub connect_timeout_secs: u64,
    /// Idle interval between keepalive pings on a subscriber connection.
    pub keepalive_secs: u64,
    /// Messages queued per local fan-out connection before it is dropped.
    pub fanout_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Redis,
            redis_url: None,
            connect_timeout_secs: 5,
            keepalive_secs: 15,
            fanout_capacity: 64,
        }
    }
}

impl BroadcastConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> QuickPollResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| QuickPollError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> QuickPollResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> QuickPollResult<()> {
        if self.keepalive_secs == 0 {
            return Err(QuickPollError::Config("keepalive_secs must be greater than 0".into()));
        }
        if self.fanout_capacity == 0 {
            return Err(QuickPollError::Config("fanout_capacity must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}
