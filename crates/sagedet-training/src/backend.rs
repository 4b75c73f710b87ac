use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobConfig, JobName};
use crate::progress::{ProgressEvent, ProgressSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Primary lifecycle state reported by the managed backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingJobState {
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

impl TrainingJobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::str::FromStr for TrainingJobState {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Stopping" => Ok(Self::Stopping),
            "Stopped" => Ok(Self::Stopped),
            other => Err(TrainingError::Backend(format!("unknown training job status `{other}`"))),
        }
    }
}

impl std::fmt::Display for TrainingJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: TrainingJobState,
    /// Finer-grained phase, e.g. `Starting`, `Downloading`, `Training`, `Uploading`.
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub model_artifacts: Option<String>,
}

impl JobStatus {
    #[must_use]
    pub fn new(state: TrainingJobState) -> Self {
        Self { state, secondary: None, failure_reason: None, model_artifacts: None }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(ref secondary) = self.secondary {
            write!(f, " ({secondary})")?;
        }
        if let Some(ref reason) = self.failure_reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_name: JobName,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub tensorboard_path: Option<String>,
}

/// A managed service that runs training jobs.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Validates the config, then submits it. Nothing remote happens for an invalid config.
    async fn submit(&self, config: &JobConfig) -> TrainingResult<JobHandle>;

    async fn describe(&self, job_name: &JobName) -> TrainingResult<JobStatus>;

    async fn stop(&self, job_name: &JobName) -> TrainingResult<()>;

    /// Polls until the job reaches a terminal state, reporting each change.
    async fn wait(
        &self,
        job_name: &JobName,
        poll_interval: Duration,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<JobStatus> {
        let mut last: Option<JobStatus> = None;
        loop {
            let status = self.describe(job_name).await?;
            if last.as_ref() != Some(&status) {
                progress.on_event(ProgressEvent::Status { job_name: job_name.clone(), status: status.clone() });
            }
            if status.is_terminal() {
                progress.on_event(ProgressEvent::Finished { job_name: job_name.clone(), status: status.clone() });
                return Ok(status);
            }
            last = Some(status);
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        statuses: Mutex<VecDeque<JobStatus>>,
    }

    #[async_trait]
    impl TrainingBackend for ScriptedBackend {
        async fn submit(&self, _config: &JobConfig) -> TrainingResult<JobHandle> {
            unreachable!()
        }

        async fn describe(&self, _job_name: &JobName) -> TrainingResult<JobStatus> {
            Ok(self.statuses.lock().unwrap().pop_front().unwrap())
        }

        async fn stop(&self, _job_name: &JobName) -> TrainingResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for CollectingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn status(state: TrainingJobState, secondary: &str) -> JobStatus {
        JobStatus { secondary: Some(secondary.to_string()), ..JobStatus::new(state) }
    }

    #[tokio::test]
    async fn test_wait_reports_changes_until_terminal() {
        let backend = ScriptedBackend {
            statuses: Mutex::new(VecDeque::from(vec![
                status(TrainingJobState::InProgress, "Starting"),
                status(TrainingJobState::InProgress, "Starting"),
                status(TrainingJobState::InProgress, "Training"),
                status(TrainingJobState::Completed, "Completed"),
            ])),
        };
        let sink = CollectingSink::default();

        let final_status = backend.wait(&JobName("job".into()), Duration::ZERO, &sink).await.unwrap();

        assert_eq!(final_status.state, TrainingJobState::Completed);
        let events = sink.0.lock().unwrap();
        // three distinct statuses plus the finish event
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], ProgressEvent::Finished { .. }));
        assert!(backend.statuses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_state_parse_and_display() {
        let state: TrainingJobState = "Stopping".parse().unwrap();
        assert!(!state.is_terminal());
        assert!("Bogus".parse::<TrainingJobState>().is_err());

        let failed = JobStatus {
            failure_reason: Some("AlgorithmError".to_string()),
            ..status(TrainingJobState::Failed, "Failed")
        };
        assert_eq!(failed.to_string(), "Failed (Failed): AlgorithmError");
    }
}
