use crate::backend::JobStatus;
use crate::job::JobName;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Submitted { job_name: JobName },
    Status { job_name: JobName, status: JobStatus },
    Finished { job_name: JobName, status: JobStatus },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Submitted { job_name } => println!("[job:{job_name}] submitted"),
            ProgressEvent::Status { job_name, status } => println!("[job:{job_name}] {status}"),
            ProgressEvent::Finished { job_name, status } => println!("[job:{job_name}] finished: {status}"),
        }
    }
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
