//! Checkpoint commands: fetch pretrained weights and list what is on disk.

use crate::config;
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sagedet_training::artifacts::scan_checkpoint_asset;
use sagedet_training::{CheckpointAsset, CheckpointFetcher};
use std::path::Path;

/// Checkpoints command subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CheckpointsCommand {
    /// Download each configured archive and extract its checkpoint subtree
    Fetch {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List extracted checkpoint files
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute checkpoints command.
pub async fn execute(command: CheckpointsCommand, config_path: Option<&Path>) -> Result<()> {
    match command {
        CheckpointsCommand::Fetch { json } => fetch(config_path, json).await,
        CheckpointsCommand::List { json } => list(config_path, json),
    }
}

async fn fetch(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let specs = workflow.config.checkpoint_specs(&workflow.layout);
    if specs.is_empty() {
        anyhow::bail!("No [[checkpoints]] configured");
    }

    let assets = CheckpointFetcher::new()?.fetch_all(&specs).await.context("Checkpoint fetch failed")?;

    print_assets(&assets, json_output, "Checkpoints fetched")
}

fn list(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let mut assets = Vec::new();
    for spec in workflow.config.checkpoint_specs(&workflow.layout) {
        if spec.destination.is_dir() {
            assets.push(scan_checkpoint_asset(&spec.destination)?);
        } else if !json_output {
            println!("  {} {}", "⚠ Missing:".yellow(), spec.destination.display());
        }
    }

    print_assets(&assets, json_output, "Checkpoints")
}

fn print_assets(assets: &[CheckpointAsset], json_output: bool, title: &str) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(assets)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("{title} ({})", assets.len()).bold().cyan());
    for asset in assets {
        println!();
        println!("  {}", asset.root.display().to_string().bold());
        for file in &asset.files {
            println!(
                "    {:<40} {:>12} {}",
                file.path.display().to_string().cyan(),
                file.size,
                file.sha256[..12.min(file.sha256.len())].dimmed()
            );
        }
    }
    println!();
    Ok(())
}
