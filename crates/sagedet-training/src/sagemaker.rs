//! SageMaker training backend, driven through the `aws` CLI.

use crate::backend::{JobHandle, JobStatus, TrainingBackend};
use crate::checkpoint::is_staging_dir_name;
use crate::dataset::join_s3;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobConfig, JobName};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;

pub const SOURCE_ARCHIVE_NAME: &str = "sourcedir.tar.gz";

/// Log level handed to the in-container training toolkit (Python `logging.INFO`).
const CONTAINER_LOG_LEVEL: u32 = 20;

pub struct SageMakerBackend {
    runner: Arc<dyn CommandRunner>,
    region: String,
}

impl SageMakerBackend {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, region: impl Into<String>) -> Self {
        Self { runner, region: region.into() }
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn aws(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("aws").args(args.iter().copied()).args(["--region", self.region.as_str()])
    }

    async fn upload_source_dir(&self, config: &JobConfig, job_name: &JobName) -> TrainingResult<String> {
        let source_dir = config.source_dir().to_path_buf();
        if !source_dir.is_dir() {
            return Err(TrainingError::Artifact(format!(
                "source_dir does not exist: {}",
                source_dir.display()
            )));
        }
        let entry_point = source_dir.join(config.entry_point());
        if !entry_point.is_file() {
            return Err(TrainingError::Artifact(format!(
                "entry point not found in source_dir: {}",
                entry_point.display()
            )));
        }

        let staging = tempfile::tempdir()?;
        let archive = staging.path().join(SOURCE_ARCHIVE_NAME);
        let target = archive.clone();
        let files = tokio::task::spawn_blocking(move || package_source_dir(&source_dir, &target))
            .await
            .map_err(|e| TrainingError::Other(e.into()))??;

        let uri = submit_directory(config, job_name);
        let archive_arg = archive.to_string_lossy().to_string();
        self.runner.run(&self.aws(&["s3", "cp", archive_arg.as_str(), uri.as_str()])).await?;
        info!(files, uri = %uri, "uploaded source directory");
        Ok(uri)
    }
}

/// S3 location the packaged source directory is uploaded to.
#[must_use]
pub fn submit_directory(config: &JobConfig, job_name: &JobName) -> String {
    join_s3(config.code_location(), &[job_name.as_str(), "source", SOURCE_ARCHIVE_NAME])
}

/// Writes every file under `source_dir` into a gzipped tarball rooted at the directory.
///
/// Checkpoint staging directories left by an interrupted fetch are not packaged.
pub fn package_source_dir(source_dir: &Path, archive: &Path) -> TrainingResult<usize> {
    let mut builder = tar::Builder::new(GzEncoder::new(File::create(archive)?, Compression::default()));
    let mut count = 0;
    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_staging_dir_name(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|e| TrainingError::Artifact(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| TrainingError::Artifact(e.to_string()))?;
        builder.append_path_with_name(entry.path(), rel)?;
        count += 1;
    }
    builder.into_inner()?.finish()?;
    Ok(count)
}

/// Renders the CreateTrainingJob request for `config`.
///
/// User hyperparameters are passed through verbatim; the toolkit keys
/// (`sagemaker_program`, ...) are JSON-encoded as the in-container toolkit expects.
#[must_use]
pub fn render_request(config: &JobConfig, job_name: &JobName, submit_dir: &str, region: &str) -> Value {
    let mut hyperparameters: Map<String, Value> =
        config.hyperparameters().iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    for (key, value) in [
        ("sagemaker_program", json!(config.entry_point())),
        ("sagemaker_submit_directory", json!(submit_dir)),
        ("sagemaker_region", json!(region)),
        ("sagemaker_job_name", json!(job_name.as_str())),
        ("sagemaker_container_log_level", json!(CONTAINER_LOG_LEVEL)),
    ] {
        hyperparameters.insert(key.to_string(), Value::String(value.to_string()));
    }

    let mut request = json!({
        "TrainingJobName": job_name.as_str(),
        "RoleArn": config.role(),
        "AlgorithmSpecification": {
            "TrainingImage": config.image_uri(),
            "TrainingInputMode": "File",
        },
        "HyperParameters": hyperparameters,
        "OutputDataConfig": { "S3OutputPath": config.output_path() },
        "ResourceConfig": {
            "InstanceType": config.instance_type(),
            "InstanceCount": config.instance_count(),
            "VolumeSizeInGB": config.instance().volume_size_gb,
        },
        "StoppingCondition": { "MaxRuntimeInSeconds": config.max_run_seconds() },
    });

    if !config.inputs().is_empty() {
        request["InputDataConfig"] = Value::Array(config.inputs().iter().map(|i| i.to_channel()).collect());
    }
    if let Some(tb) = config.tensorboard() {
        request["TensorBoardOutputConfig"] = json!({
            "S3OutputPath": tb.s3_output_path,
            "LocalPath": tb.container_local_output_path,
        });
    }
    if config.disable_profiler() {
        request["ProfilerConfig"] = json!({ "DisableProfiler": true });
    }
    request
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTrainingJob {
    training_job_status: String,
    #[serde(default)]
    secondary_status: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    model_artifacts: Option<ModelArtifacts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModelArtifacts {
    s3_model_artifacts: String,
}

fn parse_describe(stdout: &str) -> TrainingResult<JobStatus> {
    let described: DescribeTrainingJob = serde_json::from_str(stdout)?;
    Ok(JobStatus {
        state: described.training_job_status.parse()?,
        secondary: described.secondary_status,
        failure_reason: described.failure_reason,
        model_artifacts: described.model_artifacts.map(|m| m.s3_model_artifacts),
    })
}

#[async_trait]
impl TrainingBackend for SageMakerBackend {
    async fn submit(&self, config: &JobConfig) -> TrainingResult<JobHandle> {
        config.validate()?;

        let job_name = JobName::generate(config.base_job_name(), Utc::now());
        let submit_dir = self.upload_source_dir(config, &job_name).await?;
        let request = render_request(config, &job_name, &submit_dir, &self.region);
        let request = serde_json::to_string(&request)?;

        self.runner
            .run(&self.aws(&["sagemaker", "create-training-job", "--cli-input-json", request.as_str()]))
            .await?;
        info!(job = %job_name, instance_type = config.instance_type(), "training job created");

        Ok(JobHandle {
            job_name,
            submitted_at: Utc::now(),
            tensorboard_path: config.tensorboard().map(|tb| tb.s3_output_path.clone()),
        })
    }

    async fn describe(&self, job_name: &JobName) -> TrainingResult<JobStatus> {
        let stdout = self
            .runner
            .run(&self.aws(&[
                "sagemaker",
                "describe-training-job",
                "--training-job-name",
                job_name.as_str(),
                "--output",
                "json",
            ]))
            .await?;
        parse_describe(&stdout)
    }

    async fn stop(&self, job_name: &JobName) -> TrainingResult<()> {
        self.runner
            .run(&self.aws(&["sagemaker", "stop-training-job", "--training-job-name", job_name.as_str()]))
            .await?;
        info!(job = %job_name, "stop requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingJobState;
    use crate::checkpoint::extract_subtree;
    use crate::dataset::InputDataReference;
    use crate::process::CommandOutput;
    use crate::process::testing::RecordingRunner;
    use tempfile::TempDir;

    fn config(source_dir: &Path) -> JobConfig {
        JobConfig::builder()
            .role("arn:aws:iam::123456789012:role/SageMakerRole")
            .image_uri("123456789012.dkr.ecr.us-east-1.amazonaws.com/tf2-object-detection:latest")
            .entry_point("run_training.sh")
            .source_dir(source_dir)
            .hyperparameter("num_train_steps", "200")
            .hyperparameter("model_dir", "/opt/training")
            .output_path("s3://bucket/output")
            .tensorboard("s3://bucket/tensorboard", "/opt/training/")
            .disable_profiler(true)
            .base_job_name("tf2-object-detection")
            .inputs([
                InputDataReference::new("train", "s3://bucket/train/").unwrap(),
                InputDataReference::new("val", "s3://bucket/val/").unwrap(),
            ])
            .build()
            .unwrap()
    }

    fn source_dir(temp: &TempDir) -> std::path::PathBuf {
        let dir = temp.path().join("source_dir");
        std::fs::create_dir_all(dir.join("checkpoint")).unwrap();
        std::fs::write(dir.join("run_training.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.join("pipeline.config"), "model {}").unwrap();
        std::fs::write(dir.join("checkpoint/ckpt-0.index"), "idx").unwrap();
        dir
    }

    #[test]
    fn test_render_request() {
        let temp = TempDir::new().unwrap();
        let config = config(&source_dir(&temp));
        let name = JobName("tf2-object-detection-2024-01-01-00-00-00-000".to_string());

        let req = render_request(&config, &name, "s3://bucket/output/x/source/sourcedir.tar.gz", "us-east-1");

        assert_eq!(req["TrainingJobName"], name.as_str());
        assert_eq!(req["ResourceConfig"]["InstanceType"], "ml.m5.2xlarge");
        assert_eq!(req["ResourceConfig"]["InstanceCount"], 1);
        assert_eq!(req["HyperParameters"]["num_train_steps"], "200");
        assert_eq!(req["HyperParameters"]["sagemaker_program"], "\"run_training.sh\"");
        assert_eq!(req["HyperParameters"]["sagemaker_container_log_level"], "20");
        assert_eq!(req["InputDataConfig"].as_array().unwrap().len(), 2);
        assert_eq!(req["TensorBoardOutputConfig"]["S3OutputPath"], "s3://bucket/tensorboard");
        assert_eq!(req["ProfilerConfig"]["DisableProfiler"], true);
    }

    #[tokio::test]
    async fn test_submit_without_role_makes_no_remote_calls() {
        let temp = TempDir::new().unwrap();
        let config: JobConfig = serde_json::from_value(json!({
            "image_uri": "img",
            "entry_point": "run_training.sh",
            "source_dir": source_dir(&temp),
            "output_path": "s3://bucket/output",
            "base_job_name": "job",
        }))
        .unwrap();
        let runner = Arc::new(RecordingRunner::ok());
        let backend = SageMakerBackend::new(runner.clone(), "us-east-1");

        let err = backend.submit(&config).await.unwrap_err();

        assert!(matches!(err, TrainingError::InvalidSpec(_)), "{err}");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_uploads_then_creates_job() {
        let temp = TempDir::new().unwrap();
        let config = config(&source_dir(&temp));
        let runner = Arc::new(RecordingRunner::ok());
        let backend = SageMakerBackend::new(runner.clone(), "us-east-1");

        let handle = backend.submit(&config).await.unwrap();

        assert!(handle.job_name.as_str().starts_with("tf2-object-detection-"));
        assert_eq!(handle.tensorboard_path.as_deref(), Some("s3://bucket/tensorboard"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args[..2], ["s3", "cp"]);
        let expected_uri = submit_directory(&config, &handle.job_name);
        assert_eq!(calls[0].args[3], expected_uri);

        assert_eq!(calls[1].args[..2], ["sagemaker", "create-training-job"]);
        let request: Value = serde_json::from_str(&calls[1].args[3]).unwrap();
        assert_eq!(request["RoleArn"], config.role());
        assert_eq!(request["HyperParameters"]["sagemaker_submit_directory"], format!("\"{expected_uri}\""));
        assert_eq!(calls[1].args[4..], ["--region", "us-east-1"]);
    }

    #[tokio::test]
    async fn test_submit_requires_entry_point_in_source_dir() {
        let temp = TempDir::new().unwrap();
        let dir = source_dir(&temp);
        std::fs::remove_file(dir.join("run_training.sh")).unwrap();
        let runner = Arc::new(RecordingRunner::ok());
        let backend = SageMakerBackend::new(runner.clone(), "us-east-1");

        assert!(backend.submit(&config(&dir)).await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_package_source_dir_roundtrips_files() {
        let temp = TempDir::new().unwrap();
        let dir = source_dir(&temp);
        let archive = temp.path().join(SOURCE_ARCHIVE_NAME);

        assert_eq!(package_source_dir(&dir, &archive).unwrap(), 3);
        let out = temp.path().join("unpacked");
        assert_eq!(extract_subtree(&archive, "", &out).unwrap(), 3);
        assert!(out.join("checkpoint/ckpt-0.index").is_file());
    }

    #[test]
    fn test_package_source_dir_skips_checkpoint_staging() {
        let temp = TempDir::new().unwrap();
        let dir = source_dir(&temp);
        let leftover = dir.join(".checkpoint-staging-a1b2c3");
        std::fs::create_dir_all(leftover.join("extracted")).unwrap();
        std::fs::write(leftover.join("archive"), vec![0u8; 1024]).unwrap();
        std::fs::write(leftover.join("extracted/ckpt-0.index"), "partial").unwrap();
        let archive = temp.path().join(SOURCE_ARCHIVE_NAME);

        assert_eq!(package_source_dir(&dir, &archive).unwrap(), 3);
        let out = temp.path().join("unpacked");
        extract_subtree(&archive, "", &out).unwrap();
        assert!(!out.join(".checkpoint-staging-a1b2c3").exists());
    }

    #[tokio::test]
    async fn test_describe_parses_status() {
        let runner = Arc::new(RecordingRunner::new(|_| {
            CommandOutput::ok(
                r#"{
                    "TrainingJobName": "job",
                    "TrainingJobStatus": "Failed",
                    "SecondaryStatus": "Failed",
                    "FailureReason": "AlgorithmError: exit 1",
                    "ModelArtifacts": {"S3ModelArtifacts": "s3://bucket/output/job/output/model.tar.gz"}
                }"#,
            )
        }));
        let backend = SageMakerBackend::new(runner.clone(), "us-east-1");

        let status = backend.describe(&JobName("job".to_string())).await.unwrap();

        assert_eq!(status.state, TrainingJobState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("AlgorithmError: exit 1"));
        assert_eq!(status.model_artifacts.as_deref(), Some("s3://bucket/output/job/output/model.tar.gz"));
        assert_eq!(runner.calls()[0].args[..3], ["sagemaker", "describe-training-job", "--training-job-name"]);
    }

    #[tokio::test]
    async fn test_stop_surfaces_cli_failure() {
        let runner = Arc::new(RecordingRunner::new(|_| CommandOutput::failed(254, "ValidationException")));
        let backend = SageMakerBackend::new(runner, "us-east-1");

        let err = backend.stop(&JobName("job".to_string())).await.unwrap_err();
        assert!(err.to_string().contains("ValidationException"));
    }
}
