//! Role command implementation.

use crate::config;
use anyhow::{Context, Result};
use colored::Colorize;
use sagedet_training::{ProcessRunner, caller_identity, resolve_execution_role};
use serde_json::json;
use std::path::Path;

/// Resolves and prints the execution role training jobs run as.
pub async fn execute(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load_or_default(config_path)?;
    let runner = ProcessRunner;

    let role = resolve_execution_role(&runner, workflow.config.aws.role_arn.as_deref())
        .await
        .context("Failed to resolve execution role")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "role_arn": role }))?);
        return Ok(());
    }

    println!();
    println!("{}", "Execution Role".bold().cyan());
    println!("  ARN: {}", role.cyan());
    if workflow.config.aws.role_arn.is_none() {
        if let Ok(identity) = caller_identity(&runner).await {
            println!("  Account: {}", identity.account.dimmed());
        }
        println!();
        println!("  {}", "Tip: set [aws] role_arn in sagedet.toml to skip lookup.".dimmed());
    }
    println!();
    Ok(())
}
