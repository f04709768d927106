//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod agent;
mod assignment;
mod node;
mod run;

pub use agent::AgentCommands;
pub use assignment::AssignmentCommands;
pub use node::NodeCommands;
pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_core::domain::node::CapabilityStatus;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Node registry
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
    /// Probe the network and refresh the registry
    Scan {
        /// Only probe localhost, configured aliases and known hosts
        #[arg(short, long)]
        quick: bool,
    },
    /// Pipeline runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Self-reporting agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Step model assignments
    Assignment {
        #[command(subcommand)]
        command: AssignmentCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Node { command } => node::handle_node_command(command, config).await,
        Commands::Scan { quick } => node::scan(config, quick).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Agent { command } => agent::handle_agent_command(command, config).await,
        Commands::Assignment { command } => {
            assignment::handle_assignment_command(command, config).await
        }
    }
}

/// Colorize capability status for display
fn colorize_capability(status: CapabilityStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        CapabilityStatus::Online => status_str.green(),
        CapabilityStatus::Busy => status_str.yellow(),
        CapabilityStatus::Offline => status_str.red(),
    }
}
