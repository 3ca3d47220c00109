//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use quickpoll_core::BroadcastConfig;
use std::path::PathBuf;

pub mod check;
pub mod serve;

/// QuickPoll - live polls with real-time vote and like updates
#[derive(Parser)]
#[command(name = "quickpoll")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a TOML broadcast config file
    #[arg(short, long, global = true, env = "QUICKPOLL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API and WebSocket server
    Serve(serve::ServeArgs),

    /// Check that the configured message bus is reachable
    Check(check::CheckArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => BroadcastConfig::load(path)?,
            None => BroadcastConfig::default(),
        };

        match self.command {
            Commands::Serve(args) => serve::execute(args, config).await,
            Commands::Check(args) => check::execute(args, config).await,
        }
    }
}
