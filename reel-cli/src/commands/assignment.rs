//! Assignment command handlers
//!
//! Shows and edits which node and model each pipeline step runs on.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use colored::*;
use reel_client::CoordinatorClient;
use reel_core::domain::assignment::{ModelAssignment, ModelCandidate};

use crate::config::Config;

/// Assignment subcommands
#[derive(Subcommand)]
pub enum AssignmentCommands {
    /// List step assignments
    List,
    /// Replace the candidates of one step
    Set {
        /// Step name (story, shots, prompts, ...)
        step: String,

        /// Candidates as NODE=MODEL or NODE=MODEL@PRIORITY, lowest priority first.
        /// A NODE of `*` accepts any node offering the model.
        #[arg(required = true)]
        candidates: Vec<String>,
    },
}

/// Handle assignment commands
pub async fn handle_assignment_command(
    command: AssignmentCommands,
    config: &Config,
) -> Result<()> {
    let client = CoordinatorClient::new(&config.coordinator_url);

    match command {
        AssignmentCommands::List => list_assignments(&client).await,
        AssignmentCommands::Set { step, candidates } => {
            set_assignment(&client, step, &candidates).await
        }
    }
}

async fn list_assignments(client: &CoordinatorClient) -> Result<()> {
    let table = client.list_assignments().await?;

    if table.is_empty() {
        println!("{}", "No assignments configured.".yellow());
        return Ok(());
    }

    for step in table.steps() {
        if let Some(assignment) = table.get(step) {
            print_assignment(assignment);
        }
    }

    Ok(())
}

async fn set_assignment(
    client: &CoordinatorClient,
    step: String,
    candidates: &[String],
) -> Result<()> {
    let candidates = candidates
        .iter()
        .enumerate()
        .map(|(index, raw)| parse_candidate(raw, index as u32))
        .collect::<Result<Vec<_>>>()?;

    let stored = client
        .set_assignment(&ModelAssignment::new(step, candidates))
        .await?;

    println!("{} Assignment updated", "✓".green());
    print_assignment(&stored);

    Ok(())
}

fn print_assignment(assignment: &ModelAssignment) {
    println!("  {} {}", "▸".cyan(), assignment.step.bold());
    for candidate in assignment.ordered() {
        println!(
            "    {:>3}  {} / {}",
            candidate.priority, candidate.node_id, candidate.model
        );
    }
    let disabled = assignment.candidates.iter().filter(|c| !c.enabled).count();
    if disabled > 0 {
        println!("    {}", format!("{} disabled", disabled).dimmed());
    }
}

/// Parses `NODE=MODEL[@PRIORITY]`, defaulting the priority to the position
fn parse_candidate(raw: &str, position: u32) -> Result<ModelCandidate> {
    let (node, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Candidate '{}' must look like NODE=MODEL[@PRIORITY]", raw))?;

    let (model, priority) = match rest.rsplit_once('@') {
        Some((model, priority)) => {
            let priority = priority
                .parse::<u32>()
                .map_err(|_| anyhow!("Invalid priority in candidate '{}'", raw))?;
            (model, priority)
        }
        None => (rest, position),
    };

    if node.is_empty() || model.is_empty() {
        return Err(anyhow!("Candidate '{}' needs both a node and a model", raw));
    }

    Ok(ModelCandidate::new(node, model, priority))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate() {
        let candidate = parse_candidate("10.0.0.5=llama3:8b@3", 0).unwrap();
        assert_eq!(candidate.node_id, "10.0.0.5");
        assert_eq!(candidate.model, "llama3:8b");
        assert_eq!(candidate.priority, 3);

        let candidate = parse_candidate("cloud:openai=gpt-4o", 2).unwrap();
        assert_eq!(candidate.node_id, "cloud:openai");
        assert_eq!(candidate.priority, 2);

        assert!(parse_candidate("*=llama3", 0).unwrap().is_any_node());
    }

    #[test]
    fn test_parse_candidate_rejects_malformed_input() {
        assert!(parse_candidate("llama3", 0).is_err());
        assert!(parse_candidate("=llama3", 0).is_err());
        assert!(parse_candidate("node=llama3@high", 0).is_err());
    }
}
