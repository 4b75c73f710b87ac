use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

/// Workflow file marking a workspace root.
pub const CONFIG_FILE_NAME: &str = "sagedet.toml";

/// Environment variable overriding workspace discovery.
pub const WORKSPACE_ENV: &str = "SAGEDET_WORKSPACE";

/// Root of a training workspace; all configured relative paths resolve against it.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Finds the workspace: `SAGEDET_WORKSPACE`, else the nearest ancestor of
    /// `start` containing `sagedet.toml`.
    pub fn discover(start: &Path) -> TrainingResult<Self> {
        if let Ok(root) = std::env::var(WORKSPACE_ENV) {
            if !root.trim().is_empty() {
                return Ok(Self::new(PathBuf::from(root)));
            }
        }
        Self::find_upward(start).map(Self::new).ok_or_else(|| {
            TrainingError::Config(format!(
                "no {CONFIG_FILE_NAME} found in {} or its parents; run `sagedet init` first",
                start.display()
            ))
        })
    }

    fn find_upward(start: &Path) -> Option<PathBuf> {
        start.ancestors().find(|dir| dir.join(CONFIG_FILE_NAME).is_file()).map(Path::to_path_buf)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Resolves a configured path against the workspace root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) }
    }
}

/// Copies the model pipeline configuration into the source directory.
///
/// The file is consumed by the remote entry point and is not interpreted here.
/// Returns the file name, which the entry point receives as `pipeline_config_path`.
pub fn stage_pipeline_config(config_file: &Path, source_dir: &Path) -> TrainingResult<String> {
    if !config_file.is_file() {
        return Err(TrainingError::Artifact(format!(
            "pipeline config does not exist: {}",
            config_file.display()
        )));
    }
    let file_name = config_file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TrainingError::Artifact(format!("invalid pipeline config path: {}", config_file.display())))?
        .to_string();

    std::fs::create_dir_all(source_dir)?;
    let target = source_dir.join(&file_name);
    if target != config_file {
        std::fs::copy(config_file, &target)?;
    }
    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_paths() {
        let temp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(temp.path().to_path_buf());

        assert_eq!(layout.resolve(Path::new("/abs/x")), PathBuf::from("/abs/x"));
        assert_eq!(layout.resolve(Path::new("rel")), temp.path().join("rel"));
        assert!(layout.config_path().ends_with(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_find_upward_from_nested_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = temp.path().join("source_dir/checkpoint");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(WorkspaceLayout::find_upward(&nested), Some(temp.path().to_path_buf()));
    }

    #[test]
    fn test_find_upward_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(WorkspaceLayout::find_upward(temp.path()), None);
    }

    #[test]
    fn test_stage_pipeline_config_copies_unchanged() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("pipeline.config");
        std::fs::write(&src, "model { ssd { num_classes: 1 } }\n").unwrap();
        let source_dir = temp.path().join("source_dir");

        let name = stage_pipeline_config(&src, &source_dir).unwrap();

        assert_eq!(name, "pipeline.config");
        assert_eq!(
            std::fs::read_to_string(source_dir.join("pipeline.config")).unwrap(),
            "model { ssd { num_classes: 1 } }\n"
        );
    }

    #[test]
    fn test_stage_pipeline_config_missing() {
        let temp = TempDir::new().unwrap();
        assert!(stage_pipeline_config(&temp.path().join("nope.config"), temp.path()).is_err());
    }
}
