use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training job config: {0}")]
    InvalidSpec(String),

    #[error("workflow config error: {0}")]
    Config(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("command `{program}` failed ({status}): {stderr}")]
    Command { program: String, status: String, stderr: String },

    #[error("download error: {0}")]
    Download(String),

    #[error("failed to fetch checkpoint {url}")]
    Checkpoint {
        url: String,
        #[source]
        source: Box<TrainingError>,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("training backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
