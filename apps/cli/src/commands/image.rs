//! Image commands: build the training container and show its reference.

use crate::config;
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sagedet_training::{ContainerArtifact, ImageBuilder, ProcessRunner, load_container_artifact};
use std::path::Path;

/// Image command subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ImageCommand {
    /// Build and publish the image, then record its reference
    Build {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the recorded image reference
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute image command.
pub async fn execute(command: ImageCommand, config_path: Option<&Path>) -> Result<()> {
    match command {
        ImageCommand::Build { json } => build(config_path, json).await,
        ImageCommand::Show { json } => show(config_path, json),
    }
}

async fn build(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let spec = workflow.config.image_build_spec(&workflow.layout);

    let artifact = ImageBuilder::new(&ProcessRunner)
        .build_and_push(&spec)
        .await
        .with_context(|| format!("Failed to build image {}", spec.image_name))?;

    print_artifact(&artifact, &spec.reference_file, json_output, "Image published")
}

fn show(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let assets = &workflow.config.assets;
    let reference_file = workflow.layout.resolve(&assets.reference_file);

    let artifact = load_container_artifact(&reference_file, &assets.image_name)
        .context("No image reference recorded. Run `sagedet image build` first.")?;

    print_artifact(&artifact, &reference_file, json_output, "Training image")
}

fn print_artifact(artifact: &ContainerArtifact, reference_file: &Path, json_output: bool, title: &str) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(artifact)?);
        return Ok(());
    }

    println!();
    println!("{}", title.bold().cyan());
    println!("  Image: {}", artifact.image_name);
    println!("  Reference: {}", artifact.reference.cyan());
    println!("  Recorded in: {}", reference_file.display().to_string().dimmed());
    println!();
    Ok(())
}
