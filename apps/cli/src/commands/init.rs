//! Init command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use sagedet_training::CONFIG_TEMPLATE;
use sagedet_training::layout::CONFIG_FILE_NAME;
use std::path::PathBuf;

/// Directories the default workflow expects to exist.
const WORKSPACE_DIRS: &[&str] = &["docker/code", "source_dir"];

/// Execute the init command.
///
/// Writes the default workflow file and creates the build context and source directories.
pub fn execute(path: Option<PathBuf>, force: bool) -> Result<()> {
    let root = match path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    std::fs::create_dir_all(&root).with_context(|| format!("Failed to create {}", root.display()))?;

    let config_path = root.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    for dir in WORKSPACE_DIRS {
        std::fs::create_dir_all(root.join(dir))?;
    }

    println!();
    println!("{}", "Workspace initialized".bold().green());
    println!("  Config: {}", config_path.display().to_string().cyan());
    println!();
    println!("  {}", "Next:".bold());
    println!("    1. Set [aws] role_arn and [job] output_path in {}", CONFIG_FILE_NAME);
    println!("    2. Put run_training.sh and your pipeline config in source_dir/");
    println!("    3. sagedet doctor");
    println!();
    Ok(())
}
