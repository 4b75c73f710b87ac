//! Sagedet Training
//!
//! Primitives for staging and launching object-detection training on SageMaker:
//! - Fetching training assets and building the container image (`assets`)
//! - Downloading pretrained checkpoints (`checkpoint`)
//! - Describing and validating training jobs (`JobConfig`)
//! - Submitting and tracking jobs through a `TrainingBackend`
//! - Serving TensorBoard against remote event files (`logs`)

pub mod artifacts;
pub mod assets;
pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod credentials;
pub mod dataset;
pub mod error;
pub mod job;
pub mod layout;
pub mod logs;
pub mod process;
pub mod progress;
pub mod sagemaker;

pub use artifacts::{CheckpointAsset, CheckpointFile, ContainerArtifact, load_container_artifact, read_image_reference};
pub use assets::{BuildMethod, ImageBuildSpec, ImageBuilder, clone_repository, copy_entry_points};
pub use backend::{JobHandle, JobStatus, TrainingBackend, TrainingJobState};
pub use checkpoint::{CheckpointFetcher, CheckpointSpec, is_staging_dir_name};
pub use config::{CONFIG_TEMPLATE, WorkflowConfig};
pub use credentials::{CallerIdentity, caller_identity, resolve_execution_role, resolve_region};
pub use dataset::InputDataReference;
pub use error::{TrainingError, TrainingResult};
pub use job::{InstanceSpec, JobConfig, JobConfigBuilder, JobName, TensorBoardOutput};
pub use layout::{WorkspaceLayout, stage_pipeline_config};
pub use logs::TensorBoardCommand;
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, StdoutProgressSink};
pub use sagemaker::SageMakerBackend;
