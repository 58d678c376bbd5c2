//! Command-line interface for voxprep.
//!
//! Provides commands for running a configured pipeline over a batch of
//! volumes, inspecting the resolved execution plan, and listing the
//! registered steps.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::core::{resolve, BatchRunner, MethodPolicy, StepAction, StepKind};
use crate::steps::builtin_registry;

/// voxprep - configurable preprocessing pipelines for volumetric images
#[derive(Parser, Debug)]
#[command(name = "voxprep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured pipeline over its input batch
    Run {
        /// Configuration file (YAML, or JSON by extension)
        config: PathBuf,
    },

    /// Resolve a configuration and print the execution plan without running
    Plan {
        /// Configuration file
        config: PathBuf,
    },

    /// List registered steps and their methods
    Steps,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { config } => run_batch(&config).await,
            Commands::Plan { config } => show_plan(&config),
            Commands::Steps => list_steps(),
        }
    }
}

/// Run a full batch; the exit code reflects whether every run was clean.
async fn run_batch(config_path: &PathBuf) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    let registry = Arc::new(builtin_registry().context("Failed to build step registry")?);

    let runner = BatchRunner::new(registry);

    // First Ctrl-C stops dispatching new items; in-flight runs finish.
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight runs");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let summary = runner.run(&config).await?;

    println!(
        "Batch finished: {} total, {} completed, {} aborted",
        summary.total, summary.completed, summary.aborted
    );
    for report in &summary.reports {
        let marker = if report.is_clean() { "ok" } else { "FAILED" };
        println!("  [{}] {} ({})", marker, report.experiment_id, report.input.display());
    }

    if !summary.all_clean() {
        let unclean = summary.reports.iter().filter(|r| !r.is_clean()).count();
        bail!("{} of {} runs did not complete cleanly", unclean, summary.total);
    }
    Ok(())
}

/// Resolve and pretty-print the plan for a configuration.
fn show_plan(config_path: &PathBuf) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    let registry = builtin_registry().context("Failed to build step registry")?;
    let plan = resolve(&config, &registry)?;

    println!("Experiment: {}", plan.experiment);
    println!(
        "Steps: {} selected, {} active",
        plan.steps.len(),
        plan.active_steps()
    );
    for step in &plan.steps {
        let what = match &step.action {
            StepAction::Skip => "skip".to_string(),
            StepAction::Load { .. } => "load input volume".to_string(),
            StepAction::Save { .. } => "save output volume".to_string(),
            StepAction::QualityGate { expectations } => {
                format!("quality gate ({:?} mode)", expectations.mode)
            }
            StepAction::Transform { methods, shadowed } => {
                let mut label = methods
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                if !shadowed.is_empty() {
                    label.push_str(&format!(" (shadowed: {})", shadowed.join(", ")));
                }
                label
            }
        };
        let critical = if step.critical { " [critical]" } else { "" };
        let snapshot = if step.save_snapshot.is_some() {
            " [snapshot]"
        } else {
            ""
        };
        println!("  {:24} {}{}{}", step.step, what, critical, snapshot);
    }
    Ok(())
}

/// Print the registered step table.
fn list_steps() -> Result<()> {
    let registry = builtin_registry().context("Failed to build step registry")?;

    for step in registry.iter() {
        let kind = match step.kind {
            StepKind::Load => "load",
            StepKind::Save => "save",
            StepKind::Gate => "gate",
            StepKind::Transform => "transform",
        };
        println!("{} ({})", step.name, kind);
        for (priority, method) in step.methods.iter().enumerate() {
            let policy = match step.policy {
                MethodPolicy::Exclusive => format!("priority {}", priority),
                MethodPolicy::Chained => format!("chain slot {}", priority),
            };
            let params: Vec<&str> = method.param_schema().iter().map(|p| p.name).collect();
            if params.is_empty() {
                println!("  {} ({})", method.name(), policy);
            } else {
                println!("  {} ({}) params: {}", method.name(), policy, params.join(", "));
            }
        }
    }
    Ok(())
}
