//! Asset preparation: framework sources, entry-point scripts and the training image.

use crate::artifacts::{ContainerArtifact, load_container_artifact, write_image_reference};
use crate::credentials::{caller_identity, resolve_region};
use crate::error::{TrainingError, TrainingResult};
use crate::process::{CommandRunner, CommandSpec};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Shallow-clones `url` into `dest`. Returns `false` when a clone is already present.
pub async fn clone_repository(runner: &dyn CommandRunner, url: &str, dest: &Path) -> TrainingResult<bool> {
    if dest.join(".git").exists() {
        info!(dest = %dest.display(), "repository already cloned, skipping");
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = CommandSpec::new("git").args(["clone", "--depth", "1", url]).arg(dest.to_string_lossy());
    runner.stream(&spec).await?;
    info!(url, dest = %dest.display(), "cloned repository");
    Ok(true)
}

/// Copies repository-relative scripts into `dest_dir`, flattening their paths.
pub fn copy_entry_points(repo_dir: &Path, scripts: &[PathBuf], dest_dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dest_dir)?;

    let mut copied = Vec::with_capacity(scripts.len());
    for script in scripts {
        let src = repo_dir.join(script);
        if !src.is_file() {
            return Err(TrainingError::Artifact(format!("entry-point script not found: {}", src.display())));
        }
        let file_name = src
            .file_name()
            .ok_or_else(|| TrainingError::Artifact(format!("invalid script path: {}", script.display())))?;
        let target = dest_dir.join(file_name);
        std::fs::copy(&src, &target)?;
        info!(script = %script.display(), target = %target.display(), "copied entry point");
        copied.push(target);
    }
    Ok(copied)
}

/// How the training image gets built and published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BuildMethod {
    /// Build with docker and push to the account's ECR registry.
    #[default]
    Ecr,
    /// Delegate to a shell script invoked as `sh <path> <image_name>` in the build context.
    /// The script must write the reference file itself.
    Script { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ImageBuildSpec {
    pub image_name: String,
    pub tag: String,
    pub context_dir: PathBuf,
    pub reference_file: PathBuf,
    pub method: BuildMethod,
    pub region: Option<String>,
}

impl ImageBuildSpec {
    fn validate(&self) -> TrainingResult<()> {
        if self.image_name.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("image_name is required".to_string()));
        }
        if self.tag.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("image tag is required".to_string()));
        }
        if !self.context_dir.is_dir() {
            return Err(TrainingError::Artifact(format!(
                "build context does not exist: {}",
                self.context_dir.display()
            )));
        }
        Ok(())
    }
}

/// Registry host for an account's private ECR.
#[must_use]
pub fn ecr_registry(account: &str, region: &str) -> String {
    let suffix = if region.starts_with("cn-") { "amazonaws.com.cn" } else { "amazonaws.com" };
    format!("{account}.dkr.ecr.{region}.{suffix}")
}

pub struct ImageBuilder<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> ImageBuilder<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Builds and publishes the image, returning the reference read back from the reference file.
    pub async fn build_and_push(&self, spec: &ImageBuildSpec) -> TrainingResult<ContainerArtifact> {
        spec.validate()?;
        match spec.method {
            BuildMethod::Script { ref path } => self.build_with_script(spec, path).await?,
            BuildMethod::Ecr => self.build_with_ecr(spec).await?,
        }

        let artifact = load_container_artifact(&spec.reference_file, &spec.image_name)?;
        info!(reference = %artifact.reference, "image published");
        Ok(ContainerArtifact { built_at: Some(Utc::now()), ..artifact })
    }

    async fn build_with_script(&self, spec: &ImageBuildSpec, script: &Path) -> TrainingResult<()> {
        let cmd = CommandSpec::new("sh")
            .arg(script.to_string_lossy())
            .arg(spec.image_name.as_str())
            .current_dir(&spec.context_dir);
        self.runner.stream(&cmd).await?;

        if !spec.reference_file.is_file() {
            return Err(TrainingError::Artifact(format!(
                "build script did not write {}",
                spec.reference_file.display()
            )));
        }
        Ok(())
    }

    async fn build_with_ecr(&self, spec: &ImageBuildSpec) -> TrainingResult<()> {
        let identity = caller_identity(self.runner).await?;
        let region = resolve_region(self.runner, spec.region.as_deref()).await?;
        let registry = ecr_registry(&identity.account, &region);
        let reference = format!("{registry}/{}:{}", spec.image_name, spec.tag);

        let describe = CommandSpec::new("aws").args([
            "ecr",
            "describe-repositories",
            "--repository-names",
            spec.image_name.as_str(),
            "--region",
            region.as_str(),
        ]);
        if !self.runner.output(&describe).await?.success() {
            info!(repository = %spec.image_name, "creating ECR repository");
            let create = CommandSpec::new("aws").args([
                "ecr",
                "create-repository",
                "--repository-name",
                spec.image_name.as_str(),
                "--region",
                region.as_str(),
            ]);
            self.runner.run(&create).await?;
        }

        let password = self
            .runner
            .run(&CommandSpec::new("aws").args(["ecr", "get-login-password", "--region", region.as_str()]))
            .await?;
        let login = CommandSpec::new("docker")
            .args(["login", "--username", "AWS", "--password-stdin", registry.as_str()])
            .stdin(password.trim());
        self.runner.run(&login).await?;

        let local_tag = format!("{}:{}", spec.image_name, spec.tag);
        let build = CommandSpec::new("docker")
            .args(["build", "-t", local_tag.as_str(), "."])
            .current_dir(&spec.context_dir);
        self.runner.stream(&build).await?;
        self.runner.run(&CommandSpec::new("docker").args(["tag", local_tag.as_str(), reference.as_str()])).await?;
        self.runner.stream(&CommandSpec::new("docker").args(["push", reference.as_str()])).await?;

        write_image_reference(&spec.reference_file, &reference)
    }
}
