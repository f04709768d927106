//! Agent command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_client::CoordinatorClient;
use reel_core::dto::agent::{AgentCapability, AgentRecord};

use crate::config::Config;

/// Agent subcommands
#[derive(Subcommand)]
pub enum AgentCommands {
    /// List agents that reported within their time-to-live
    List,
}

/// Handle agent commands
pub async fn handle_agent_command(command: AgentCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.coordinator_url);

    match command {
        AgentCommands::List => list_agents(&client).await,
    }
}

async fn list_agents(client: &CoordinatorClient) -> Result<()> {
    let agents = client.list_agents().await?;

    if agents.is_empty() {
        println!("{}", "No live agents.".yellow());
    } else {
        println!("{}", format!("Found {} live agent(s):", agents.len()).bold());
        println!();
        for agent in agents {
            print_agent_summary(&agent);
        }
    }

    Ok(())
}

fn print_agent_summary(agent: &AgentRecord) {
    println!("  {} Agent {}", "▸".cyan(), agent.hostname.bold());
    if !agent.ips.is_empty() {
        println!("    Addresses: {}", agent.ips.join(", ").dimmed());
    }
    println!("    Text gen:  {}", describe(&agent.text_gen));
    println!("    Render:    {}", describe(&agent.render));
    match &agent.current_job {
        Some(job) => println!("    Job:       {}", job.yellow()),
        None => println!("    Job:       {}", "idle".green()),
    }
    if let Some(seen) = agent.last_seen {
        println!(
            "    Last Seen: {}",
            seen.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
}

fn describe(capability: &AgentCapability) -> String {
    if capability.available {
        format!("{} {}", "✓".green(), capability.models.join(", "))
    } else {
        "✗".red().to_string()
    }
}
