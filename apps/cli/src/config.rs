//! Workflow configuration loading.

use anyhow::{Context, Result};
use sagedet_training::credentials::ROLE_ENV;
use sagedet_training::{WorkflowConfig, WorkspaceLayout};
use std::path::{Path, PathBuf};

/// A loaded `sagedet.toml` and the workspace its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub layout: WorkspaceLayout,
    pub config: WorkflowConfig,
}

/// Loads the workflow file.
///
/// Precedence:
/// 1. `--config <path>` (workspace root is the file's directory)
/// 2. `SAGEDET_WORKSPACE`
/// 3. Nearest `sagedet.toml` above the current directory
///
/// `SAGEDET_ROLE_ARN` and `AWS_REGION` override the `[aws]` section.
pub fn load(config_path: Option<&Path>) -> Result<Workflow> {
    let (layout, path) = match config_path {
        Some(path) => {
            let root = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => std::env::current_dir().context("Failed to read current directory")?,
            };
            (WorkspaceLayout::new(root), path.to_path_buf())
        }
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let layout = WorkspaceLayout::discover(&cwd).context("Failed to discover workspace")?;
            let path = layout.config_path();
            (layout, path)
        }
    };

    let mut config = WorkflowConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load workflow file {}", path.display()))?;
    apply_env_overrides(&mut config);
    Ok(Workflow { layout, config })
}

/// Like [`load`], but falls back to defaults rooted at the current directory
/// when no workflow file exists.
pub fn load_or_default(config_path: Option<&Path>) -> Result<Workflow> {
    if config_path.is_some() {
        return load(config_path);
    }
    match load(None) {
        Ok(workflow) => Ok(workflow),
        Err(e) => {
            tracing::debug!(error = %e, "no workflow file, using defaults");
            let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let mut config = WorkflowConfig::default();
            apply_env_overrides(&mut config);
            Ok(Workflow { layout: WorkspaceLayout::new(root), config })
        }
    }
}

fn apply_env_overrides(config: &mut WorkflowConfig) {
    if let Some(role) = non_empty_env(ROLE_ENV) {
        config.aws.role_arn = Some(role);
    }
    if let Some(region) = non_empty_env("AWS_REGION") {
        config.aws.region = Some(region);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
