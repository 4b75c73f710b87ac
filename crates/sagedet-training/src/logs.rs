use crate::error::{TrainingError, TrainingResult};
use crate::process::{CommandRunner, CommandSpec};
use tracing::info;

pub const DEFAULT_TENSORBOARD_PORT: u16 = 6006;

/// TensorBoard pointed at a job's remote event files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBoardCommand {
    pub log_dir: String,
    pub port: u16,
    pub host: String,
    /// Region exported for TensorBoard's S3 filesystem.
    pub region: Option<String>,
}

impl TensorBoardCommand {
    #[must_use]
    pub fn new(log_dir: impl Into<String>) -> Self {
        Self { log_dir: log_dir.into(), port: DEFAULT_TENSORBOARD_PORT, host: "localhost".to_string(), region: None }
    }

    #[must_use]
    pub fn to_spec(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("tensorboard").args([
            "--logdir".to_string(),
            self.log_dir.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--host".to_string(),
            self.host.clone(),
        ]);
        if let Some(ref region) = self.region {
            spec = spec.env("AWS_REGION", region.as_str());
        }
        spec
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Runs TensorBoard in the foreground until it exits or is interrupted.
    pub async fn launch(&self, runner: &dyn CommandRunner) -> TrainingResult<()> {
        if self.log_dir.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("tensorboard log directory is required".to_string()));
        }
        info!(log_dir = %self.log_dir, url = %self.url(), "starting tensorboard");
        runner.stream(&self.to_spec()).await
    }
}
