//! Logs command implementation.

use crate::config;
use anyhow::{Context, Result};
use colored::Colorize;
use sagedet_training::{ProcessRunner, TensorBoardCommand};
use std::path::Path;

/// Runs TensorBoard in the foreground against the job's S3 event files.
pub async fn execute(config_path: Option<&Path>, log_dir: Option<String>, port: u16, host: String) -> Result<()> {
    let workflow = config::load_or_default(config_path)?;
    let log_dir = log_dir
        .or_else(|| workflow.config.job.tensorboard_output_path.clone())
        .context("No log directory given and [job] tensorboard_output_path is not set")?;

    let tensorboard = TensorBoardCommand {
        port,
        host,
        region: workflow.config.aws.region.clone(),
        ..TensorBoardCommand::new(log_dir)
    };

    println!();
    println!("{}", "TensorBoard".bold().cyan());
    println!("  Logs: {}", tensorboard.log_dir.dimmed());
    println!("  URL: {}", tensorboard.url().cyan());
    println!("  {}", "Press Ctrl-C to stop.".dimmed());
    println!();

    tensorboard.launch(&ProcessRunner).await.context("TensorBoard exited with an error")?;
    Ok(())
}
