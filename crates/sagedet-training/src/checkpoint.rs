//! Pretrained checkpoint acquisition.
//!
//! Each [`CheckpointSpec`] names an archive, a subtree inside it and a local
//! destination. The subtree is extracted into a staging directory one level
//! above the destination's parent and swapped in only once extraction
//! succeeded, so re-running a fetch never leaves files from an earlier run
//! behind. Staging never lives inside the directory that gets packaged for
//! upload, and leftovers from an interrupted run are removed on the next fetch.

use crate::artifacts::{CheckpointAsset, scan_checkpoint_asset, sha256_file};
use crate::error::{TrainingError, TrainingResult};
use flate2::read::GzDecoder;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Name prefix of the temporary directories a fetch stages into.
pub const STAGING_PREFIX: &str = ".checkpoint-staging-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    /// `http(s)://` or `file://` URL, or a local path.
    pub url: String,
    /// Directory inside the archive to extract, e.g. `efficientdet_d1_coco17_tpu-32/checkpoint`.
    pub archive_path: String,
    pub destination: PathBuf,
    /// Expected hex sha256 of the archive, when known.
    #[serde(default)]
    pub sha256: Option<String>,
}

pub struct CheckpointFetcher {
    client: reqwest::Client,
}

impl CheckpointFetcher {
    pub fn new() -> TrainingResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("sagedet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetches each checkpoint in order, stopping at the first failure.
    ///
    /// A failure is reported as [`TrainingError::Checkpoint`] naming the URL.
    pub async fn fetch_all(&self, specs: &[CheckpointSpec]) -> TrainingResult<Vec<CheckpointAsset>> {
        let mut assets = Vec::with_capacity(specs.len());
        for spec in specs {
            let asset = self
                .fetch(spec)
                .await
                .map_err(|e| TrainingError::Checkpoint { url: spec.url.clone(), source: Box::new(e) })?;
            assets.push(asset);
        }
        Ok(assets)
    }

    pub async fn fetch(&self, spec: &CheckpointSpec) -> TrainingResult<CheckpointAsset> {
        let destination = spec.destination.clone();
        let parent = non_empty(destination.parent());
        std::fs::create_dir_all(&parent)?;
        let root = staging_root(&destination);
        let prefix = staging_prefix(&destination);
        if root != parent {
            remove_stale_staging(&parent, is_staging_dir_name)?;
        }
        // the random suffix never contains `-`, so `checkpoint-v2` staging is left alone
        remove_stale_staging(&root, |name| name.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('-')))?;

        let staging = tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)?;
        let archive = staging.path().join("archive");

        info!(url = %spec.url, "downloading checkpoint archive");
        let bytes = self.download(&spec.url, &archive).await?;
        debug!(bytes, "download complete");

        if let Some(ref expected) = spec.sha256 {
            let path = archive.clone();
            let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| TrainingError::Other(e.into()))??;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(TrainingError::Download(format!(
                    "sha256 mismatch for {}: expected {expected}, got {actual}",
                    spec.url
                )));
            }
        }

        let extracted = staging.path().join("extracted");
        let (archive_path, target) = (spec.archive_path.clone(), extracted.clone());
        let count = tokio::task::spawn_blocking(move || extract_subtree(&archive, &archive_path, &target))
            .await
            .map_err(|e| TrainingError::Other(e.into()))??;

        if destination.is_dir() {
            std::fs::remove_dir_all(&destination)?;
        } else if destination.exists() {
            std::fs::remove_file(&destination)?;
        }
        std::fs::rename(&extracted, &destination)?;
        info!(files = count, destination = %destination.display(), "checkpoint extracted");

        scan_checkpoint_asset(&destination)
    }

    async fn download(&self, url: &str, target: &Path) -> TrainingResult<u64> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()
                .map_err(|e| TrainingError::Download(format!("{url}: {e}")))?;

            let mut file = tokio::fs::File::create(target).await?;
            let mut stream = response.bytes_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            return Ok(written);
        }

        let local = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        if !local.is_file() {
            return Err(TrainingError::Download(format!("unsupported URL or missing file: {url}")));
        }
        Ok(tokio::fs::copy(&local, target).await?)
    }
}

fn non_empty(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Directory to stage into: the destination's grandparent, so `source_dir/checkpoint`
/// stages in the workspace root rather than in `source_dir`.
fn staging_root(destination: &Path) -> PathBuf {
    let parent = non_empty(destination.parent());
    match parent.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) if parent != Path::new(".") => PathBuf::from("."),
        _ => parent,
    }
}

/// Staging name prefix for one destination, e.g. `.checkpoint-staging-source_dir-checkpoint-`.
///
/// Tagged with the destination so a sweep never touches another fetch's staging directory.
fn staging_prefix(destination: &Path) -> String {
    let name = |p: Option<&Path>| {
        p.and_then(Path::file_name).map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    };
    format!("{STAGING_PREFIX}{}-{}-", name(destination.parent()), name(Some(destination)))
}

/// Whether `name` is a staging directory left by [`CheckpointFetcher::fetch`].
pub fn is_staging_dir_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Removes directories matching `is_stale` that a killed fetch left in `dir`.
fn remove_stale_staging(dir: &Path, is_stale: impl Fn(&str) -> bool) -> TrainingResult<()> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() && is_stale(&entry.file_name().to_string_lossy()) {
            warn!(path = %entry.path().display(), "removing leftover checkpoint staging directory");
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

/// Splits an archive-internal path into its components, ignoring `.` and surrounding slashes.
fn prefix_components(archive_path: &str) -> Vec<String> {
    archive_path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

/// Safe relative form of an entry path, or an error for `..` and absolute paths.
fn entry_components(path: &Path) -> TrainingResult<Vec<String>> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => {
                return Err(TrainingError::Archive(format!("refusing unsafe entry path: {}", path.display())));
            }
        }
    }
    Ok(out)
}

fn open_archive(path: &Path) -> TrainingResult<Box<dyn Read>> {
    let mut magic = [0u8; 2];
    let is_gzip = {
        let mut f = File::open(path)?;
        f.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b]
    };
    let reader = BufReader::new(File::open(path)?);
    if is_gzip { Ok(Box::new(GzDecoder::new(reader))) } else { Ok(Box::new(reader)) }
}

/// Extracts the entries under `archive_path` into `destination`, stripping the prefix.
///
/// Returns the number of files written. Symlinks and other special entries are skipped.
pub fn extract_subtree(archive: &Path, archive_path: &str, destination: &Path) -> TrainingResult<usize> {
    let prefix = prefix_components(archive_path);
    let mut tar = tar::Archive::new(open_archive(archive)?);
    std::fs::create_dir_all(destination)?;

    let mut count = 0;
    for entry in tar.entries().map_err(|e| TrainingError::Archive(e.to_string()))? {
        let mut entry = entry.map_err(|e| TrainingError::Archive(e.to_string()))?;
        let path = entry.path().map_err(|e| TrainingError::Archive(e.to_string()))?.into_owned();
        let components = entry_components(&path)?;

        if components.len() <= prefix.len() || components[..prefix.len()] != prefix[..] {
            continue;
        }
        let rel: PathBuf = components[prefix.len()..].iter().collect();
        let target = destination.join(&rel);

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&target).map_err(|e| TrainingError::Archive(format!("{}: {e}", rel.display())))?;
            count += 1;
        } else {
            debug!(entry = %path.display(), "skipping non-regular archive entry");
        }
    }

    if count == 0 {
        return Err(TrainingError::Archive(format!(
            "archive {} has no files under `{archive_path}`",
            archive.display()
        )));
    }
    Ok(count)
}
