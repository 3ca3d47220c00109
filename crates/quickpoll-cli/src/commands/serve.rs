//! Web server command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use quickpoll_bus::{BusConnector, InMemoryBus, MessageBus};
use quickpoll_core::{BridgeOptions, BroadcastConfig, BusBackend, MemoryPollStore};
use quickpoll_web::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, default_value = "8000")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Redis URL for the message bus
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Use the in-process bus instead of Redis (single node only)
    #[arg(long)]
    pub memory_bus: bool,

    /// Seconds between keepalive pings on idle WebSocket connections
    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    /// Also write logs to a file
    #[arg(long)]
    pub log: bool,

    /// Log file path (default: ./quickpoll.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    /// Apply command-line overrides on top of the file config.
    pub fn apply(&self, mut config: BroadcastConfig) -> Result<BroadcastConfig> {
        if let Some(url) = &self.redis_url {
            config.redis_url = Some(url.clone());
        }
        if self.memory_bus {
            config.backend = BusBackend::Memory;
        }
        if let Some(secs) = self.keepalive_secs {
            config.keepalive_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Build the bus selected by `config`. Never fails: a missing or bad Redis
/// URL yields a connector that is always unavailable.
pub fn build_bus(config: &BroadcastConfig) -> Arc<dyn MessageBus> {
    match (config.backend, &config.redis_url) {
        (BusBackend::Memory, _) => Arc::new(InMemoryBus::new()),
        (BusBackend::Redis, Some(url)) => Arc::new(BusConnector::new(url, config.connect_timeout())),
        (BusBackend::Redis, None) => {
            tracing::warn!("No Redis URL configured, live updates use local fan-out only");
            Arc::new(BusConnector::disabled())
        }
    }
}

fn bus_label(config: &BroadcastConfig) -> String {
    match (config.backend, &config.redis_url) {
        (BusBackend::Memory, _) => "in-process".to_string(),
        (BusBackend::Redis, Some(url)) => url.clone(),
        (BusBackend::Redis, None) => "none (local fan-out)".to_string(),
    }
}

pub async fn execute(args: ServeArgs, config: BroadcastConfig) -> Result<()> {
    let config = args.apply(config)?;
    let bus = build_bus(&config);
    let state = AppState::new(Arc::new(MemoryPollStore::new()), bus, BridgeOptions::from(&config));

    println!();
    println!(
        "  {} {}",
        "QuickPoll".cyan().bold(),
        "Server".bold()
    );
    println!();
    println!(
        "  {}        http://{}:{}/api",
        "API".green(),
        args.host,
        args.port
    );
    println!(
        "  {}  ws://{}:{}/ws/poll",
        "All polls".green(),
        args.host,
        args.port
    );
    println!(
        "  {}   ws://{}:{}/ws/poll/{{poll_id}}",
        "One poll".green(),
        args.host,
        args.port
    );
    println!(
        "  {}        {}",
        "Bus".green(),
        bus_label(&config)
    );
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    quickpoll_web::run_server(state, &args.host, args.port).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> ServeArgs {
        let mut argv = vec!["quickpoll"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).serve
    }

    #[test]
    fn test_flags_override_file_config() {
        let file = BroadcastConfig::from_toml_str("redis_url = \"redis://file:6379\"\nkeepalive_secs = 30").unwrap();
        let args = parse(&["--redis-url", "redis://flag:6379", "--keepalive-secs", "5"]);

        let config = args.apply(file).unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://flag:6379"));
        assert_eq!(config.keepalive_secs, 5);
        assert_eq!(config.backend, BusBackend::Redis);
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let args = parse(&["--keepalive-secs", "0"]);
        assert!(args.apply(BroadcastConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_build_bus_memory_accepts_publish() {
        let args = parse(&["--memory-bus"]);
        let config = args.apply(BroadcastConfig::default()).unwrap();
        let bus = build_bus(&config);
        assert!(bus.publish("polls:global", "{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_build_bus_without_url_is_unavailable() {
        let mut config = BroadcastConfig::default();
        config.redis_url = None;
        let bus = build_bus(&config);
        assert!(bus.publish("polls:global", "{}").await.is_err());
    }
}
