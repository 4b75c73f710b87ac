use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A built training image and its registry reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerArtifact {
    pub image_name: String,
    /// Full registry reference, e.g. `123.dkr.ecr.us-east-1.amazonaws.com/tf2-od:latest`.
    pub reference: String,
    #[serde(default)]
    pub built_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Path relative to the checkpoint root.
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Extracted pretrained-model files at a known path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointAsset {
    pub root: PathBuf,
    pub files: Vec<CheckpointFile>,
}

impl CheckpointAsset {
    /// Relative file paths, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.to_string_lossy().replace('\\', "/")).collect()
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Writes the image reference without a trailing newline.
pub fn write_image_reference(path: &Path, reference: &str) -> TrainingResult<()> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(TrainingError::Artifact("image reference must not be empty".to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, reference)?;
    Ok(())
}

/// Reads back an image reference, stripping whitespace a shell `echo` leaves behind.
pub fn read_image_reference(path: &Path) -> TrainingResult<String> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TrainingError::Artifact(format!("failed to read image reference {}: {e}", path.display()))
    })?;
    let reference = contents.trim();
    if reference.is_empty() {
        return Err(TrainingError::Artifact(format!("image reference file is empty: {}", path.display())));
    }
    Ok(reference.to_string())
}

/// Loads the artifact recorded by a previous build.
pub fn load_container_artifact(path: &Path, image_name: &str) -> TrainingResult<ContainerArtifact> {
    let reference = read_image_reference(path)?;
    let built_at = std::fs::metadata(path).and_then(|m| m.modified()).ok().map(DateTime::<Utc>::from);
    Ok(ContainerArtifact { image_name: image_name.to_string(), reference, built_at })
}

/// Describes the checkpoint files currently present under `root`.
pub fn scan_checkpoint_asset(root: &Path) -> TrainingResult<CheckpointAsset> {
    if !root.is_dir() {
        return Err(TrainingError::Artifact(format!("checkpoint directory does not exist: {}", root.display())));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TrainingError::Artifact(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| TrainingError::Artifact(e.to_string()))?
            .to_path_buf();
        files.push(CheckpointFile {
            sha256: sha256_file(entry.path())?,
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            path: rel,
        });
    }

    Ok(CheckpointAsset { root: root.to_path_buf(), files })
}
