//! Node command handlers
//!
//! Lists registry nodes, shows one node's capabilities and triggers scans.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_client::CoordinatorClient;
use reel_core::domain::node::{BackendKind, Capability, CapabilityState, CapabilityStatus, Node};
use reel_core::dto::node::NodeQuery;

use super::colorize_capability;
use crate::config::Config;

/// Node subcommands
#[derive(Subcommand)]
pub enum NodeCommands {
    /// List registry nodes
    List {
        /// Only nodes providing this capability (text_gen, render)
        #[arg(short, long)]
        capability: Option<Capability>,

        /// Only nodes whose capability has this status (online, offline, busy)
        #[arg(short, long)]
        status: Option<CapabilityStatus>,
    },
    /// Get node details
    Get {
        /// Node ID
        id: String,
    },
}

/// Handle node commands
pub async fn handle_node_command(command: NodeCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.coordinator_url);

    match command {
        NodeCommands::List { capability, status } => {
            list_nodes(&client, NodeQuery { capability, status }).await
        }
        NodeCommands::Get { id } => get_node(&client, &id).await,
    }
}

/// Trigger a scan and print its summary
pub async fn scan(config: &Config, quick: bool) -> Result<()> {
    let client = CoordinatorClient::new(&config.coordinator_url);

    let mode = if quick { "quick" } else { "full" };
    println!("{}", format!("Running {} scan...", mode).dimmed());

    let summary = client.scan(quick).await?;

    println!(
        "{}",
        format!(
            "Probed {} host(s) in {} ms",
            summary.hosts_probed, summary.duration_ms
        )
        .bold()
    );

    if summary.nodes_found.is_empty() {
        println!("{}", "No nodes answered.".yellow());
    } else {
        println!("  {}", "Found:".green());
        for id in &summary.nodes_found {
            println!("    {} {}", "✓".green(), id);
        }
    }

    if !summary.nodes_marked_offline.is_empty() {
        println!("  {}", "Marked offline:".red());
        for id in &summary.nodes_marked_offline {
            println!("    {} {}", "✗".red(), id);
        }
    }

    Ok(())
}

async fn list_nodes(client: &CoordinatorClient, query: NodeQuery) -> Result<()> {
    let nodes = client.list_nodes(query).await?;

    if nodes.is_empty() {
        println!("{}", "No nodes found.".yellow());
    } else {
        println!("{}", format!("Found {} node(s):", nodes.len()).bold());
        println!();
        for node in nodes {
            print_node_summary(&node);
        }
    }

    Ok(())
}

async fn get_node(client: &CoordinatorClient, id: &str) -> Result<()> {
    let node = client.get_node(id).await?;
    print_node_details(&node);
    Ok(())
}

fn print_node_summary(node: &Node) {
    println!("  {} Node {}", "▸".cyan(), node.id.bold());
    println!("    Address:   {}", node.address.dimmed());
    println!("    Text gen:  {}", capability_line(&node.text_gen));
    println!("    Render:    {}", capability_line(&node.render));
    if let Some(job) = &node.current_job {
        println!("    Job:       {}", job.yellow());
    }
    println!();
}

fn print_node_details(node: &Node) {
    println!("{}", "Node Details:".bold());
    println!("  ID:          {}", node.id.cyan());
    println!("  Address:     {}", node.address);
    if !node.aliases.is_empty() {
        println!("  Aliases:     {}", node.aliases.join(", ").dimmed());
    }
    let backend = match &node.backend {
        BackendKind::Local => "local".to_string(),
        BackendKind::Cloud { provider } => format!("cloud ({})", provider),
    };
    println!("  Backend:     {}", backend);
    println!("  Origin:      {:?}", node.origin);
    println!(
        "  Probed:      {}",
        node.last_probed_at.format("%Y-%m-%d %H:%M:%S")
    );

    print_capability("Text Generation", &node.text_gen);
    print_capability("Render", &node.render);

    let catalog = &node.render_catalog;
    if !catalog.loras.is_empty() {
        println!("  LoRAs:       {}", catalog.loras.join(", ").dimmed());
    }
    if !catalog.vaes.is_empty() {
        println!("  VAEs:        {}", catalog.vaes.join(", ").dimmed());
    }
}

fn print_capability(title: &str, state: &CapabilityState) {
    println!("\n{}", format!("{}:", title).bold());
    println!("  Status:      {}", capability_line(state));
    if let Some(endpoint) = &state.endpoint {
        println!("  Endpoint:    {}", endpoint);
    }
    if let Some(version) = &state.version {
        println!("  Version:     {}", version.dimmed());
    }
    for model in &state.models {
        println!("    - {}", model);
    }
}

fn capability_line(state: &CapabilityState) -> String {
    if !state.available {
        return "unavailable".dimmed().to_string();
    }
    format!(
        "{} ({} model(s))",
        colorize_capability(state.status),
        state.models.len()
    )
}
