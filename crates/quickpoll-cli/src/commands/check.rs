//! Bus connectivity check.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use quickpoll_bus::BusConnector;
use quickpoll_core::BroadcastConfig;

#[derive(Args)]
pub struct CheckArgs {
    /// Redis URL to check
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

pub async fn execute(args: CheckArgs, config: BroadcastConfig) -> Result<()> {
    let Some(url) = args.redis_url.or_else(|| config.redis_url.clone()) else {
        bail!("No Redis URL configured (use --redis-url or REDIS_URL)");
    };

    let connector = BusConnector::new(&url, config.connect_timeout());
    if connector.acquire().await.is_some() {
        println!("{} Redis reachable at {}", "✓".green(), url);
        Ok(())
    } else {
        println!("{} Redis unreachable at {}", "✗".red(), url);
        bail!("message bus unavailable");
    }
}
