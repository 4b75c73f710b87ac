//! Assets command implementation.

use crate::config;
use anyhow::{Context, Result};
use colored::Colorize;
use sagedet_training::{ProcessRunner, clone_repository, copy_entry_points};
use serde_json::json;
use std::path::Path;

/// Clones the model repository and copies the entry points into the build context.
pub async fn execute(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let assets = &workflow.config.assets;
    let repo_dir = workflow.layout.resolve(&assets.clone_dir);
    let code_dir = workflow.layout.resolve(&assets.code_dir);

    let cloned = clone_repository(&ProcessRunner, &assets.repository_url, &repo_dir)
        .await
        .with_context(|| format!("Failed to clone {}", assets.repository_url))?;
    let copied = copy_entry_points(&repo_dir, &assets.scripts, &code_dir)
        .context("Failed to copy entry points into the build context")?;

    if json_output {
        let out = json!({
            "repository": repo_dir,
            "cloned": cloned,
            "copied": copied,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training assets".bold().cyan());
    if cloned {
        println!("  Cloned: {}", repo_dir.display().to_string().dimmed());
    } else {
        println!("  Repository: {} {}", repo_dir.display().to_string().dimmed(), "(already present)".dimmed());
    }
    for path in &copied {
        println!("  Copied: {}", path.display().to_string().green());
    }
    println!();
    println!("  {}", "Next: sagedet image build".dimmed());
    println!();
    Ok(())
}
