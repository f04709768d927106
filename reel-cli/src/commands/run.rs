//! Run command handlers
//!
//! Starts pipeline runs and inspects their steps, logs and outputs.

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use reel_client::CoordinatorClient;
use reel_core::domain::log::{LogEntry, LogLevel};
use reel_core::domain::pipeline::{PipelineRun, RunOptions, RunStatus, Step, StepStatus};
use reel_core::dto::run::{RunSummary, StartRun};
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Delay between polls while waiting for a run
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Start a run from a premise
    Start {
        /// Story premise
        premise: String,

        #[command(flatten)]
        steps: StepFlags,

        /// Wait for the run to finish, printing progress
        #[arg(short, long)]
        wait: bool,
    },
    /// List all runs
    List,
    /// Get run details
    Get {
        /// Run ID or unambiguous prefix
        id: String,

        /// Number of trailing log lines to show
        #[arg(short, long, default_value_t = 20)]
        log: usize,
    },
    /// Cancel a running run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Print the outputs of a finished run as JSON
    Artifacts {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Optional steps to enable
#[derive(Args, Debug, Clone, Copy)]
pub struct StepFlags {
    /// Split the story into parts before shot breakdown
    #[arg(long)]
    segmentation: bool,

    /// Generate narration
    #[arg(long)]
    narration: bool,

    /// Generate music cues
    #[arg(long)]
    music: bool,

    /// Submit render jobs
    #[arg(long)]
    render: bool,

    /// Enable every optional step
    #[arg(long)]
    all: bool,
}

impl From<StepFlags> for RunOptions {
    fn from(flags: StepFlags) -> Self {
        RunOptions {
            segmentation: flags.all || flags.segmentation,
            narration: flags.all || flags.narration,
            music: flags.all || flags.music,
            render: flags.all || flags.render,
        }
    }
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.coordinator_url);

    match command {
        RunCommands::Start {
            premise,
            steps,
            wait,
        } => start_run(&client, premise, steps.into(), wait).await,
        RunCommands::List => list_runs(&client).await,
        RunCommands::Get { id, log } => get_run(&client, &id, log).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
        RunCommands::Artifacts { id } => get_artifacts(&client, &id).await,
    }
}

async fn start_run(
    client: &CoordinatorClient,
    premise: String,
    options: RunOptions,
    wait: bool,
) -> Result<()> {
    let run = client.start_run(&StartRun { premise, options }).await?;

    println!("{} Run started: {}", "✓".green(), run.id.to_string().cyan());

    if wait {
        let finished = wait_for_run(client, run.id).await?;
        println!();
        print_run_details(&finished, 20);
    }

    Ok(())
}

async fn wait_for_run(client: &CoordinatorClient, id: Uuid) -> Result<PipelineRun> {
    let mut last_progress = None;

    loop {
        let run = client.get_run(id).await?;

        if last_progress != Some(run.progress) {
            let step = run
                .current_step
                .and_then(|i| run.steps.get(i))
                .map(|s| s.name())
                .unwrap_or("-");
            println!("  {:>3}% {}", run.progress, step.dimmed());
            last_progress = Some(run.progress);
        }

        if run.status.is_terminal() {
            return Ok(run);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn list_runs(client: &CoordinatorClient) -> Result<()> {
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

async fn get_run(client: &CoordinatorClient, id: &str, log_lines: usize) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.get_run(uuid).await?;

    print_run_details(&run, log_lines);

    Ok(())
}

async fn cancel_run(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    client.cancel_run(uuid).await?;

    println!("{} Cancellation requested for run {}", "✓".green(), uuid);

    Ok(())
}

async fn get_artifacts(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let artifacts = client.get_artifacts(uuid).await?;

    println!("{}", serde_json::to_string_pretty(&artifacts)?);

    Ok(())
}

fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(run.status));
    println!("    Progress: {}%", run.progress);
    if let Some(step) = run.current_step {
        println!("    Step:     {}", step);
    }
    if let Some(failure) = &run.failure {
        println!("    Failed:   {} ({:?})", failure.step, failure.kind);
    }
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run_details(run: &PipelineRun, log_lines: usize) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Status:    {}", colorize_status(run.status));
    println!("  Progress:  {}%", run.progress);
    println!(
        "  Created:   {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(finished) = run.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
        let duration = finished.signed_duration_since(run.created_at);
        println!("  Duration:  {}s", duration.num_seconds());
    }

    println!("\n{}", "Steps:".bold());
    for step in &run.steps {
        print_step(step);
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Failure:".bold());
        println!("  Step:      {}", failure.step);
        println!("  Kind:      {:?}", failure.kind);
        println!("  {}", failure.message.red());
    }

    if log_lines > 0 && !run.log.is_empty() {
        let entries = run.log.to_vec();
        let skip = entries.len().saturating_sub(log_lines);
        println!("\n{}", "Log:".bold());
        println!("{}", "─".repeat(80).dimmed());
        for entry in &entries[skip..] {
            print_log_entry(entry);
        }
        println!("{}", "─".repeat(80).dimmed());
    }
}

fn print_step(step: &Step) {
    let marker = match step.status {
        StepStatus::Completed => "✓".green(),
        StepStatus::Failed => "✗".red(),
        StepStatus::Running => "▸".cyan(),
        StepStatus::Skipped => "-".dimmed(),
        StepStatus::Pending => "·".dimmed(),
    };

    let target = match (&step.node_id, &step.model) {
        (Some(node), Some(model)) => format!(" [{} / {}]", node, model),
        _ => String::new(),
    };

    println!("  {} {:<13}{}", marker, step.name(), target.dimmed());

    if let Some(summary) = &step.output_summary {
        println!("      {}", summary.dimmed());
    }
    if let Some(error) = &step.error {
        println!("      {}", error.red());
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

fn colorize_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::Completed => status_str.green(),
        RunStatus::Failed => status_str.red(),
        RunStatus::Cancelled => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> StepFlags {
        StepFlags {
            segmentation: false,
            narration: false,
            music: false,
            render: false,
            all: false,
        }
    }

    #[test]
    fn test_all_enables_every_optional_step() {
        let options = RunOptions::from(StepFlags { all: true, ..flags() });
        assert!(options.segmentation && options.narration && options.music && options.render);
    }

    #[test]
    fn test_individual_flags() {
        let options = RunOptions::from(StepFlags {
            music: true,
            ..flags()
        });
        assert_eq!(
            options,
            RunOptions {
                music: true,
                ..RunOptions::default()
            }
        );
    }
}
