//! Workflow configuration file (`sagedet.toml`).

use crate::assets::{BuildMethod, ImageBuildSpec};
use crate::checkpoint::CheckpointSpec;
use crate::dataset::inputs_from_map;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{DEFAULT_INSTANCE_TYPE, JobConfig, JobConfigBuilder};
use crate::layout::WorkspaceLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Starter file written by `sagedet init`.
pub const CONFIG_TEMPLATE: &str = r#"# sagedet workflow configuration

[aws]
# region = "us-east-1"
# role_arn = "arn:aws:iam::123456789012:role/service-role/AmazonSageMaker-ExecutionRole"

[assets]
repository_url = "https://github.com/tensorflow/models.git"
clone_dir = "models"
scripts = [
    "research/object_detection/model_main_tf2.py",
    "research/object_detection/exporter_main_v2.py",
]
build_context = "docker"
code_dir = "docker/code"
image_name = "tf2-object-detection"
image_tag = "latest"
build_method = "ecr"
# build_script = "docker/build_and_push.sh"
reference_file = "ecr_image_fullname.txt"

[[checkpoints]]
url = "http://download.tensorflow.org/models/object_detection/tf2/20200711/efficientdet_d1_coco17_tpu-32.tar.gz"
archive_path = "efficientdet_d1_coco17_tpu-32/checkpoint"
destination = "source_dir/checkpoint"

[job]
entry_point = "run_training.sh"
source_dir = "source_dir"
# pipeline_config = "pipeline.config"
instance_type = "ml.m5.2xlarge"
instance_count = 1
volume_size_gb = 30
base_job_name = "tf2-object-detection"
# output_path = "s3://my-bucket/tf2-object-detection/output"
# tensorboard_output_path = "s3://my-bucket/tf2-object-detection/tensorboard"
tensorboard_local_path = "/opt/training/"
disable_profiler = true
max_run_seconds = 86400
wait = true
poll_interval_seconds = 30

[job.hyperparameters]
model_dir = "/opt/training"
pipeline_config_path = "pipeline.config"
num_train_steps = 1000
sample_1_of_n_eval_examples = 1

[inputs]
# train = "s3://my-bucket/data/train/"
# val = "s3://my-bucket/data/val/"
"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMethodKind {
    #[default]
    Ecr,
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub repository_url: String,
    pub clone_dir: PathBuf,
    pub scripts: Vec<PathBuf>,
    pub build_context: PathBuf,
    pub code_dir: PathBuf,
    pub image_name: String,
    pub image_tag: String,
    pub build_method: BuildMethodKind,
    pub build_script: Option<PathBuf>,
    pub reference_file: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            repository_url: "https://github.com/tensorflow/models.git".to_string(),
            clone_dir: PathBuf::from("models"),
            scripts: vec![
                PathBuf::from("research/object_detection/model_main_tf2.py"),
                PathBuf::from("research/object_detection/exporter_main_v2.py"),
            ],
            build_context: PathBuf::from("docker"),
            code_dir: PathBuf::from("docker/code"),
            image_name: "tf2-object-detection".to_string(),
            image_tag: "latest".to_string(),
            build_method: BuildMethodKind::Ecr,
            build_script: None,
            reference_file: PathBuf::from("ecr_image_fullname.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSection {
    pub entry_point: String,
    pub source_dir: PathBuf,
    pub pipeline_config: Option<PathBuf>,
    pub instance_type: String,
    pub instance_count: u32,
    pub volume_size_gb: u32,
    pub base_job_name: String,
    pub output_path: Option<String>,
    pub code_location: Option<String>,
    pub tensorboard_output_path: Option<String>,
    pub tensorboard_local_path: String,
    pub disable_profiler: bool,
    pub max_run_seconds: u64,
    pub wait: bool,
    pub poll_interval_seconds: u64,
    pub hyperparameters: toml::Table,
}

impl Default for JobSection {
    fn default() -> Self {
        let mut hyperparameters = toml::Table::new();
        hyperparameters.insert("model_dir".into(), toml::Value::String("/opt/training".into()));
        hyperparameters.insert("pipeline_config_path".into(), toml::Value::String("pipeline.config".into()));
        hyperparameters.insert("num_train_steps".into(), toml::Value::Integer(1000));
        hyperparameters.insert("sample_1_of_n_eval_examples".into(), toml::Value::Integer(1));

        Self {
            entry_point: "run_training.sh".to_string(),
            source_dir: PathBuf::from("source_dir"),
            pipeline_config: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            instance_count: 1,
            volume_size_gb: 30,
            base_job_name: "tf2-object-detection".to_string(),
            output_path: None,
            code_location: None,
            tensorboard_output_path: None,
            tensorboard_local_path: "/opt/training/".to_string(),
            disable_profiler: true,
            max_run_seconds: 24 * 60 * 60,
            wait: true,
            poll_interval_seconds: 30,
            hyperparameters,
        }
    }
}

fn default_checkpoints() -> Vec<CheckpointSpec> {
    vec![CheckpointSpec {
        url: "http://download.tensorflow.org/models/object_detection/tf2/20200711/efficientdet_d1_coco17_tpu-32.tar.gz"
            .to_string(),
        archive_path: "efficientdet_d1_coco17_tpu-32/checkpoint".to_string(),
        destination: PathBuf::from("source_dir/checkpoint"),
        sha256: None,
    }]
}

/// Everything the four workflow stages read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default = "default_checkpoints")]
    pub checkpoints: Vec<CheckpointSpec>,
    #[serde(default)]
    pub job: JobSection,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            aws: AwsConfig::default(),
            assets: AssetsConfig::default(),
            checkpoints: default_checkpoints(),
            job: JobSection::default(),
            inputs: BTreeMap::new(),
        }
    }
}

/// Coerces a TOML scalar to the string the entry point receives.
pub fn coerce_toml_value(name: &str, value: &toml::Value) -> TrainingResult<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(TrainingError::Config(format!(
            "hyperparameter `{name}` must be a scalar value"
        ))),
    }
}

impl WorkflowConfig {
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content).map_err(|e| TrainingError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> TrainingResult<Self> {
        toml::from_str(content).map_err(|e| TrainingError::Config(e.to_string()))
    }

    /// Hyperparameters with every value coerced to a string.
    pub fn hyperparameters(&self) -> TrainingResult<BTreeMap<String, String>> {
        self.job
            .hyperparameters
            .iter()
            .map(|(k, v)| Ok((k.clone(), coerce_toml_value(k, v)?)))
            .collect()
    }

    #[must_use]
    pub fn build_method(&self, layout: &WorkspaceLayout) -> BuildMethod {
        match self.assets.build_method {
            BuildMethodKind::Ecr => BuildMethod::Ecr,
            BuildMethodKind::Script => BuildMethod::Script {
                path: layout.resolve(
                    self.assets
                        .build_script
                        .as_deref()
                        .unwrap_or_else(|| Path::new("build_and_push.sh")),
                ),
            },
        }
    }

    #[must_use]
    pub fn image_build_spec(&self, layout: &WorkspaceLayout) -> ImageBuildSpec {
        ImageBuildSpec {
            image_name: self.assets.image_name.clone(),
            tag: self.assets.image_tag.clone(),
            context_dir: layout.resolve(&self.assets.build_context),
            reference_file: layout.resolve(&self.assets.reference_file),
            method: self.build_method(layout),
            region: self.aws.region.clone(),
        }
    }

    /// Checkpoint specs with destinations resolved against the workspace.
    #[must_use]
    pub fn checkpoint_specs(&self, layout: &WorkspaceLayout) -> Vec<CheckpointSpec> {
        self.checkpoints
            .iter()
            .map(|c| CheckpointSpec { destination: layout.resolve(&c.destination), ..c.clone() })
            .collect()
    }

    /// Pre-populates a [`JobConfigBuilder`] from the `[job]` and `[inputs]` sections.
    ///
    /// Role and image are supplied by the caller since both come from earlier stages.
    pub fn job_builder(&self, layout: &WorkspaceLayout) -> TrainingResult<JobConfigBuilder> {
        let job = &self.job;
        let mut builder = JobConfig::builder()
            .entry_point(job.entry_point.as_str())
            .source_dir(layout.resolve(&job.source_dir))
            .hyperparameters(self.hyperparameters()?)
            .instance_type(job.instance_type.as_str())
            .instance_count(job.instance_count)
            .volume_size_gb(job.volume_size_gb)
            .base_job_name(job.base_job_name.as_str())
            .disable_profiler(job.disable_profiler)
            .max_run_seconds(job.max_run_seconds)
            .inputs(inputs_from_map(&self.inputs)?);

        if let Some(ref output_path) = job.output_path {
            builder = builder.output_path(output_path.as_str());
        }
        if let Some(ref code_location) = job.code_location {
            builder = builder.code_location(code_location.as_str());
        }
        if let Some(ref tb) = job.tensorboard_output_path {
            builder = builder.tensorboard(tb.as_str(), job.tensorboard_local_path.as_str());
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_matches_defaults() {
        let parsed = WorkflowConfig::parse(CONFIG_TEMPLATE).unwrap();
        assert_eq!(parsed, WorkflowConfig::default());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let parsed = WorkflowConfig::parse("").unwrap();
        assert_eq!(parsed.checkpoints.len(), 1);
        assert_eq!(parsed.job.instance_type, "ml.m5.2xlarge");
        assert_eq!(parsed.assets.image_name, "tf2-object-detection");
    }

    #[test]
    fn test_hyperparameters_coerced_to_strings() {
        let parsed = WorkflowConfig::parse(
            r#"
[job.hyperparameters]
num_train_steps = 200
learning_rate = 0.004
use_bfloat16 = false
label = "bees"
"#,
        )
        .unwrap();

        let hp = parsed.hyperparameters().unwrap();
        assert_eq!(hp.len(), 4);
        assert_eq!(hp["num_train_steps"], "200");
        assert_eq!(hp["learning_rate"], "0.004");
        assert_eq!(hp["use_bfloat16"], "false");
        assert_eq!(hp["label"], "bees");
    }

    #[test]
    fn test_array_hyperparameter_rejected() {
        let parsed = WorkflowConfig::parse("[job.hyperparameters]\nsteps = [1, 2]\n").unwrap();
        assert!(parsed.hyperparameters().is_err());
    }

    #[test]
    fn test_job_builder_end_to_end() {
        let temp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(temp.path().to_path_buf());
        let parsed = WorkflowConfig::parse(
            r#"
[job]
output_path = "s3://bucket/output"
tensorboard_output_path = "s3://bucket/tensorboard"

[job.hyperparameters]
num_train_steps = "200"
sample_1_of_n_eval_examples = 1

[inputs]
train = "s3://bucket/train/"
val = "s3://bucket/val/"
"#,
        )
        .unwrap();

        let config = parsed
            .job_builder(&layout)
            .unwrap()
            .role("arn:aws:iam::123456789012:role/R")
            .image_uri("R")
            .build()
            .unwrap();

        assert_eq!(config.instance_count(), 1);
        assert_eq!(config.instance_type(), "ml.m5.2xlarge");
        let hp: Vec<(&str, &str)> = config.hyperparameters().iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(hp, vec![("num_train_steps", "200"), ("sample_1_of_n_eval_examples", "1")]);
        assert_eq!(config.inputs()[0].uri, "s3://bucket/train/");
        assert_eq!(config.inputs()[1].uri, "s3://bucket/val/");
        assert_eq!(config.source_dir(), temp.path().join("source_dir"));
        assert_eq!(config.tensorboard().unwrap().container_local_output_path, "/opt/training/");
    }

    #[test]
    fn test_script_build_method_resolves_path() {
        let temp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(temp.path().to_path_buf());
        let parsed = WorkflowConfig::parse(
            "[assets]\nbuild_method = \"script\"\nbuild_script = \"docker/build_and_push.sh\"\n",
        )
        .unwrap();

        let spec = parsed.image_build_spec(&layout);
        assert_eq!(spec.method, BuildMethod::Script { path: temp.path().join("docker/build_and_push.sh") });
        assert_eq!(spec.reference_file, temp.path().join("ecr_image_fullname.txt"));
    }

    #[test]
    fn test_load_from_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sagedet.toml");
        std::fs::write(&path, "[job\n").unwrap();

        let err = WorkflowConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("sagedet.toml"));
    }
}
