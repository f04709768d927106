//! Reel CLI
//!
//! Command-line interface for interacting with the Reel coordinator.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "reel")]
#[command(about = "Reel generation cluster CLI", long_about = None)]
struct Cli {
    /// Coordinator URL
    #[arg(long, env = "COORDINATOR_URL", default_value = "http://localhost:8080")]
    coordinator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        coordinator_url: cli.coordinator_url,
    };

    handle_command(cli.command, &config).await
}
