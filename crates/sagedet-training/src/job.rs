use crate::dataset::InputDataReference;
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Longest job name the training backend accepts.
pub const MAX_JOB_NAME_LEN: usize = 63;

pub const DEFAULT_INSTANCE_TYPE: &str = "ml.m5.2xlarge";

/// Name of a submitted training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobName(pub String);

impl JobName {
    /// `<prefix>-<YYYY-MM-DD-HH-MM-SS-mmm>`, with the prefix truncated to fit.
    #[must_use]
    pub fn generate(prefix: &str, now: DateTime<Utc>) -> Self {
        let stamp = now.format("%Y-%m-%d-%H-%M-%S-%3f").to_string();
        let max_prefix = MAX_JOB_NAME_LEN - stamp.len() - 1;
        let prefix: String = prefix.chars().take(max_prefix).collect();
        let prefix = prefix.trim_end_matches('-');
        Self(format!("{prefix}-{stamp}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Compute resources for the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_type: String,
    pub instance_count: u32,
    pub volume_size_gb: u32,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        Self { instance_type: DEFAULT_INSTANCE_TYPE.to_string(), instance_count: 1, volume_size_gb: 30 }
    }
}

/// Where TensorBoard event files are synced while the job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorBoardOutput {
    pub s3_output_path: String,
    pub container_local_output_path: String,
}

/// Immutable description of one training attempt.
///
/// Built through [`JobConfigBuilder`]; a config deserialized from a saved plan is
/// re-validated by the backend before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    role: String,
    #[serde(default)]
    image_uri: String,
    #[serde(default)]
    entry_point: String,
    #[serde(default)]
    source_dir: PathBuf,
    #[serde(default)]
    hyperparameters: BTreeMap<String, String>,
    #[serde(default)]
    instance: InstanceSpec,
    #[serde(default)]
    output_path: String,
    #[serde(default)]
    code_location: Option<String>,
    #[serde(default)]
    tensorboard: Option<TensorBoardOutput>,
    #[serde(default)]
    disable_profiler: bool,
    #[serde(default)]
    base_job_name: String,
    #[serde(default)]
    inputs: Vec<InputDataReference>,
    #[serde(default = "default_max_run_seconds")]
    max_run_seconds: u64,
}

fn default_max_run_seconds() -> u64 {
    24 * 60 * 60
}

impl JobConfig {
    #[must_use]
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder::default()
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    #[must_use]
    pub fn image_uri(&self) -> &str {
        &self.image_uri
    }

    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    #[must_use]
    pub fn hyperparameters(&self) -> &BTreeMap<String, String> {
        &self.hyperparameters
    }

    #[must_use]
    pub fn instance(&self) -> &InstanceSpec {
        &self.instance
    }

    #[must_use]
    pub fn instance_type(&self) -> &str {
        &self.instance.instance_type
    }

    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.instance.instance_count
    }

    #[must_use]
    pub fn output_path(&self) -> &str {
        &self.output_path
    }

    /// Upload prefix for the packaged source directory; defaults to the output path.
    #[must_use]
    pub fn code_location(&self) -> &str {
        self.code_location.as_deref().unwrap_or(&self.output_path)
    }

    #[must_use]
    pub fn tensorboard(&self) -> Option<&TensorBoardOutput> {
        self.tensorboard.as_ref()
    }

    #[must_use]
    pub fn disable_profiler(&self) -> bool {
        self.disable_profiler
    }

    #[must_use]
    pub fn base_job_name(&self) -> &str {
        &self.base_job_name
    }

    #[must_use]
    pub fn inputs(&self) -> &[InputDataReference] {
        &self.inputs
    }

    #[must_use]
    pub fn max_run_seconds(&self) -> u64 {
        self.max_run_seconds
    }

    pub fn validate(&self) -> TrainingResult<()> {
        require(&self.role, "role")?;
        if !self.role.starts_with("arn:") {
            return Err(TrainingError::InvalidSpec(format!("role must be an IAM role ARN, got `{}`", self.role)));
        }
        self.validate_settings()
    }

    /// Checks every field except the role, which may still need a remote lookup.
    pub fn validate_settings(&self) -> TrainingResult<()> {
        require(&self.image_uri, "image_uri")?;
        require(&self.entry_point, "entry_point")?;
        if self.source_dir.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("source_dir is required".to_string()));
        }
        require(&self.output_path, "output_path")?;
        require_s3(&self.output_path, "output_path")?;
        if let Some(ref code_location) = self.code_location {
            require_s3(code_location, "code_location")?;
        }
        require(&self.instance.instance_type, "instance_type")?;
        if !self.instance.instance_type.starts_with("ml.") {
            return Err(TrainingError::InvalidSpec(format!(
                "instance_type must look like `ml.<family>.<size>`, got `{}`",
                self.instance.instance_type
            )));
        }
        if self.instance.instance_count == 0 {
            return Err(TrainingError::InvalidSpec("instance_count must be >= 1".to_string()));
        }
        if self.instance.volume_size_gb == 0 {
            return Err(TrainingError::InvalidSpec("volume_size_gb must be >= 1".to_string()));
        }
        if self.max_run_seconds == 0 {
            return Err(TrainingError::InvalidSpec("max_run_seconds must be >= 1".to_string()));
        }
        validate_base_job_name(&self.base_job_name)?;
        if self.hyperparameters.keys().any(|k| k.trim().is_empty()) {
            return Err(TrainingError::InvalidSpec("hyperparameter names must not be empty".to_string()));
        }
        if let Some(ref tb) = self.tensorboard {
            require_s3(&tb.s3_output_path, "tensorboard.s3_output_path")?;
            require(&tb.container_local_output_path, "tensorboard.container_local_output_path")?;
        }

        let mut channels = BTreeSet::new();
        for input in &self.inputs {
            input.validate()?;
            if !channels.insert(input.channel.as_str()) {
                return Err(TrainingError::InvalidSpec(format!("duplicate input channel `{}`", input.channel)));
            }
        }
        Ok(())
    }
}

fn require(value: &str, field: &str) -> TrainingResult<()> {
    if value.trim().is_empty() {
        return Err(TrainingError::InvalidSpec(format!("{field} is required")));
    }
    Ok(())
}

fn require_s3(value: &str, field: &str) -> TrainingResult<()> {
    if !value.starts_with("s3://") {
        return Err(TrainingError::InvalidSpec(format!("{field} must be an s3:// URI, got `{value}`")));
    }
    Ok(())
}

fn validate_base_job_name(name: &str) -> TrainingResult<()> {
    require(name, "base_job_name")?;
    let valid = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(TrainingError::InvalidSpec(format!(
            "base_job_name may only contain alphanumerics and hyphens, got `{name}`"
        )));
    }
    Ok(())
}

/// Fluent builder for [`JobConfig`].
#[derive(Debug, Clone, Default)]
pub struct JobConfigBuilder {
    role: Option<String>,
    image_uri: Option<String>,
    entry_point: Option<String>,
    source_dir: Option<PathBuf>,
    hyperparameters: BTreeMap<String, String>,
    instance: InstanceSpec,
    output_path: Option<String>,
    code_location: Option<String>,
    tensorboard: Option<TensorBoardOutput>,
    disable_profiler: bool,
    base_job_name: Option<String>,
    inputs: Vec<InputDataReference>,
    max_run_seconds: Option<u64>,
}

impl JobConfigBuilder {
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn image_uri(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    #[must_use]
    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    #[must_use]
    pub fn source_dir(mut self, source_dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(source_dir.into());
        self
    }

    /// Adds one hyperparameter; the value is coerced to its string form.
    #[must_use]
    pub fn hyperparameter(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.hyperparameters.insert(name.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn hyperparameters<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Display,
    {
        for (k, v) in values {
            self.hyperparameters.insert(k.into(), v.to_string());
        }
        self
    }

    #[must_use]
    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance.instance_type = instance_type.into();
        self
    }

    #[must_use]
    pub fn instance_count(mut self, count: u32) -> Self {
        self.instance.instance_count = count;
        self
    }

    #[must_use]
    pub fn volume_size_gb(mut self, size: u32) -> Self {
        self.instance.volume_size_gb = size;
        self
    }

    #[must_use]
    pub fn output_path(mut self, output_path: impl Into<String>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    #[must_use]
    pub fn code_location(mut self, code_location: impl Into<String>) -> Self {
        self.code_location = Some(code_location.into());
        self
    }

    #[must_use]
    pub fn tensorboard(
        mut self,
        s3_output_path: impl Into<String>,
        container_local_output_path: impl Into<String>,
    ) -> Self {
        self.tensorboard = Some(TensorBoardOutput {
            s3_output_path: s3_output_path.into(),
            container_local_output_path: container_local_output_path.into(),
        });
        self
    }

    #[must_use]
    pub fn disable_profiler(mut self, disable: bool) -> Self {
        self.disable_profiler = disable;
        self
    }

    #[must_use]
    pub fn base_job_name(mut self, name: impl Into<String>) -> Self {
        self.base_job_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn input(mut self, input: InputDataReference) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn inputs(mut self, inputs: impl IntoIterator<Item = InputDataReference>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    #[must_use]
    pub fn max_run_seconds(mut self, seconds: u64) -> Self {
        self.max_run_seconds = Some(seconds);
        self
    }

    /// Validates everything but the role without consuming the builder.
    pub fn check_settings(&self) -> TrainingResult<()> {
        self.clone().assemble().validate_settings()
    }

    /// Assembles the config, failing on the first missing or invalid field.
    pub fn build(self) -> TrainingResult<JobConfig> {
        let config = self.assemble();
        config.validate()?;
        Ok(config)
    }

    fn assemble(self) -> JobConfig {
        JobConfig {
            role: self.role.unwrap_or_default(),
            image_uri: self.image_uri.unwrap_or_default(),
            entry_point: self.entry_point.unwrap_or_default(),
            source_dir: self.source_dir.unwrap_or_default(),
            hyperparameters: self.hyperparameters,
            instance: self.instance,
            output_path: self.output_path.unwrap_or_default(),
            code_location: self.code_location,
            tensorboard: self.tensorboard,
            disable_profiler: self.disable_profiler,
            base_job_name: self.base_job_name.unwrap_or_default(),
            inputs: self.inputs,
            max_run_seconds: self.max_run_seconds.unwrap_or_else(default_max_run_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> JobConfigBuilder {
        JobConfig::builder()
            .role("arn:aws:iam::123456789012:role/service-role/SageMakerRole")
            .image_uri("123456789012.dkr.ecr.us-east-1.amazonaws.com/tf2-object-detection:latest")
            .entry_point("run_training.sh")
            .source_dir("source_dir")
            .output_path("s3://bucket/output")
            .base_job_name("tf2-object-detection")
    }

    #[test]
    fn test_hyperparameters_exact_and_stringified() {
        let config = base()
            .hyperparameter("num_train_steps", 200)
            .hyperparameter("learning_rate", 0.5)
            .hyperparameter("use_tpu", false)
            .hyperparameter("model_dir", "/opt/training")
            .build()
            .unwrap();

        let expected: BTreeMap<String, String> = [
            ("learning_rate", "0.5"),
            ("model_dir", "/opt/training"),
            ("num_train_steps", "200"),
            ("use_tpu", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(config.hyperparameters(), &expected);
    }

    #[test]
    fn test_end_to_end_config_embeds_defaults_and_inputs() {
        let config = base()
            .inputs([
                InputDataReference::new("train", "s3://bucket/train/").unwrap(),
                InputDataReference::new("val", "s3://bucket/val/").unwrap(),
            ])
            .hyperparameters([("num_train_steps", "200"), ("sample_1_of_n_eval_examples", "1")])
            .build()
            .unwrap();

        assert_eq!(config.instance_count(), 1);
        assert_eq!(config.instance_type(), "ml.m5.2xlarge");
        assert_eq!(config.hyperparameters().len(), 2);
        assert_eq!(config.hyperparameters()["num_train_steps"], "200");
        assert_eq!(config.hyperparameters()["sample_1_of_n_eval_examples"], "1");
        assert_eq!(config.inputs().len(), 2);
        assert_eq!(config.code_location(), "s3://bucket/output");
    }

    #[test]
    fn test_missing_role_rejected() {
        let err = JobConfig::builder()
            .image_uri("img")
            .entry_point("run_training.sh")
            .source_dir("source_dir")
            .output_path("s3://bucket/output")
            .base_job_name("job")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("role is required"), "{err}");
    }

    #[test]
    fn test_check_settings_ignores_only_the_role() {
        let without_role = JobConfig::builder()
            .image_uri("img")
            .entry_point("run_training.sh")
            .source_dir("source_dir")
            .output_path("s3://bucket/output")
            .base_job_name("job");
        assert!(without_role.check_settings().is_ok());
        assert!(without_role.clone().build().is_err());

        let err = JobConfig::builder()
            .image_uri("img")
            .entry_point("run_training.sh")
            .source_dir("source_dir")
            .base_job_name("job")
            .check_settings()
            .unwrap_err();
        assert!(err.to_string().contains("output_path is required"), "{err}");
    }

    #[test]
    fn test_invalid_fields_rejected() {
        assert!(base().instance_count(0).build().is_err());
        assert!(base().instance_type("m5.large").build().is_err());
        assert!(base().output_path("/tmp/out").build().is_err());
        assert!(base().base_job_name("bad_name").build().is_err());
        assert!(base().tensorboard("/local", "/opt/training").build().is_err());
        assert!(
            base()
                .input(InputDataReference { channel: "train".into(), uri: "s3://a/".into() })
                .input(InputDataReference { channel: "train".into(), uri: "s3://b/".into() })
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_deserialized_config_without_role_fails_validation() {
        let json = serde_json::json!({
            "image_uri": "img",
            "entry_point": "run_training.sh",
            "source_dir": "source_dir",
            "output_path": "s3://bucket/output",
            "base_job_name": "job",
        });
        let config: JobConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.max_run_seconds(), 86_400);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_name_format_and_truncation() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let name = JobName::generate("tf2-object-detection", now);
        assert_eq!(name.as_str(), "tf2-object-detection-2024-03-05-07-08-09-000");

        let long = JobName::generate(&"x".repeat(100), now);
        assert_eq!(long.as_str().len(), MAX_JOB_NAME_LEN);
        assert!(long.as_str().ends_with("-2024-03-05-07-08-09-000"));
    }
}
