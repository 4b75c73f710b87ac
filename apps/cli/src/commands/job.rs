//! Job commands: plan, submit and track SageMaker training jobs.

use crate::config::{self, Workflow};
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sagedet_training::sagemaker::{render_request, submit_directory};
use sagedet_training::{
    JobConfig, JobConfigBuilder, JobName, JobStatus, NullProgressSink, ProcessRunner, ProgressEvent, ProgressSink,
    SageMakerBackend, StdoutProgressSink, TrainingBackend, TrainingJobState, read_image_reference,
    resolve_execution_role, resolve_region, stage_pipeline_config,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Hyperparameter the entry point reads the staged pipeline config name from.
const PIPELINE_CONFIG_KEY: &str = "pipeline_config_path";

/// Job command subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum JobCommand {
    /// Assemble and validate the job without submitting it
    Plan {
        /// Execution role ARN (overrides [aws] role_arn)
        #[arg(long)]
        role: Option<String>,
        /// Image reference (defaults to the recorded reference file)
        #[arg(long)]
        image: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit the job and, unless disabled, wait for it to finish
    Submit {
        /// Execution role ARN (overrides [aws] role_arn)
        #[arg(long)]
        role: Option<String>,
        /// Image reference (defaults to the recorded reference file)
        #[arg(long)]
        image: Option<String>,
        /// Return right after submission
        #[arg(long)]
        no_wait: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a job's current status
    Status {
        /// Training job name
        job_name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Block until a job reaches a terminal state
    Wait {
        /// Training job name
        job_name: String,
    },
    /// Request that a running job stop
    Stop {
        /// Training job name
        job_name: String,
    },
}

/// Execute job command.
pub async fn execute(command: JobCommand, config_path: Option<&Path>) -> Result<()> {
    match command {
        JobCommand::Plan { role, image, json } => plan(config_path, role, image, json),
        JobCommand::Submit { role, image, no_wait, json } => submit(config_path, role, image, no_wait, json).await,
        JobCommand::Status { job_name, json } => status(config_path, job_name, json).await,
        JobCommand::Wait { job_name } => wait(config_path, job_name).await,
        JobCommand::Stop { job_name } => stop(config_path, job_name).await,
    }
}

/// Image reference from the flag, else from the recorded reference file.
fn image_reference(workflow: &Workflow, image: Option<String>) -> Result<String> {
    if let Some(image) = image.filter(|i| !i.trim().is_empty()) {
        return Ok(image);
    }
    let reference_file = workflow.layout.resolve(&workflow.config.assets.reference_file);
    read_image_reference(&reference_file)
        .context("No image reference recorded. Run `sagedet image build` or pass --image.")
}

/// Job builder from the workflow file, with everything but the role set.
fn job_builder(workflow: &Workflow, image: String) -> Result<JobConfigBuilder> {
    let mut builder = workflow.config.job_builder(&workflow.layout)?.image_uri(image);
    if let Some(ref pipeline_config) = workflow.config.job.pipeline_config {
        let has_key = workflow.config.job.hyperparameters.contains_key(PIPELINE_CONFIG_KEY);
        if let (false, Some(name)) = (has_key, pipeline_config.file_name()) {
            builder = builder.hyperparameter(PIPELINE_CONFIG_KEY, name.to_string_lossy());
        }
    }
    Ok(builder)
}

/// Builds the job from the workflow file; a missing `role` fails validation.
fn assemble(workflow: &Workflow, role: Option<String>, image: String) -> Result<JobConfig> {
    let mut builder = job_builder(workflow, image)?;
    if let Some(role) = role {
        builder = builder.role(role);
    }
    builder.build().context("Invalid training job configuration")
}

fn plan(config_path: Option<&Path>, role: Option<String>, image: Option<String>, json_output: bool) -> Result<()> {
    let workflow = config::load(config_path)?;
    let image = image_reference(&workflow, image)?;
    let role = role.or_else(|| workflow.config.aws.role_arn.clone());
    let config = assemble(&workflow, role, image)?;

    let preview_name = JobName(format!("{}-<timestamp>", config.base_job_name()));
    let request = workflow.config.aws.region.as_deref().map(|region| {
        render_request(&config, &preview_name, &submit_directory(&config, &preview_name), region)
    });

    if json_output {
        let out = json!({ "config": config, "request": request });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training job plan".bold().cyan());
    print_config(&config);
    if request.is_none() {
        println!();
        println!("  {}", "Set [aws] region or AWS_REGION to preview the submission request.".dimmed());
    }
    println!();
    Ok(())
}

fn print_config(config: &JobConfig) {
    println!("  Role: {}", config.role());
    println!("  Image: {}", config.image_uri().cyan());
    println!("  Entry point: {} (in {})", config.entry_point(), config.source_dir().display());
    println!(
        "  Instances: {} × {} ({} GB)",
        config.instance_count(),
        config.instance_type(),
        config.instance().volume_size_gb
    );
    println!("  Output: {}", config.output_path());
    if let Some(tb) = config.tensorboard() {
        println!("  TensorBoard: {}", tb.s3_output_path);
    }
    println!("  Hyperparameters:");
    for (name, value) in config.hyperparameters() {
        println!("    {:<32} {}", name, value.dimmed());
    }
    if !config.inputs().is_empty() {
        println!("  Inputs:");
        for input in config.inputs() {
            println!("    {:<32} {}", input.channel, input.uri.dimmed());
        }
    }
}

async fn backend(workflow: &Workflow) -> Result<SageMakerBackend> {
    let runner = Arc::new(ProcessRunner);
    let region = resolve_region(runner.as_ref(), workflow.config.aws.region.as_deref())
        .await
        .context("Failed to resolve AWS region")?;
    Ok(SageMakerBackend::new(runner, region))
}

fn poll_interval(workflow: &Workflow) -> Duration {
    Duration::from_secs(workflow.config.job.poll_interval_seconds.max(1))
}

async fn submit(
    config_path: Option<&Path>,
    role: Option<String>,
    image: Option<String>,
    no_wait: bool,
    json_output: bool,
) -> Result<()> {
    let workflow = config::load(config_path)?;
    let image = image_reference(&workflow, image)?;

    let builder = job_builder(&workflow, image)?;
    builder.check_settings().context("Invalid training job configuration")?;

    let job = &workflow.config.job;
    if let Some(ref pipeline_config) = job.pipeline_config {
        let name = stage_pipeline_config(
            &workflow.layout.resolve(pipeline_config),
            &workflow.layout.resolve(&job.source_dir),
        )
        .context("Failed to stage pipeline config")?;
        tracing::info!(file = %name, "staged pipeline config");
    }
    for spec in workflow.config.checkpoint_specs(&workflow.layout) {
        if !spec.destination.is_dir() {
            warn!(
                destination = %spec.destination.display(),
                "checkpoint directory missing; run `sagedet checkpoints fetch` first"
            );
        }
    }

    let configured_role = role.or_else(|| workflow.config.aws.role_arn.clone());
    let role = resolve_execution_role(&ProcessRunner, configured_role.as_deref())
        .await
        .context("Failed to resolve execution role")?;
    let config = builder.role(role).build().context("Invalid training job configuration")?;

    let backend = backend(&workflow).await?;
    let handle = backend.submit(&config).await.context("Failed to submit training job")?;
    let progress: &dyn ProgressSink = if json_output { &NullProgressSink } else { &StdoutProgressSink };

    if !json_output {
        println!();
        println!("{}", "Training job submitted".bold().green());
        println!("  Job: {}", handle.job_name.as_str().cyan());
        println!("  Region: {}", backend.region());
        if let Some(ref tb) = handle.tensorboard_path {
            println!("  Logs: {}", format!("sagedet logs {tb}").dimmed());
        }
        println!();
    }
    progress.on_event(ProgressEvent::Submitted { job_name: handle.job_name.clone() });

    if no_wait || !job.wait {
        if json_output {
            println!("{}", serde_json::to_string_pretty(&handle)?);
        }
        return Ok(());
    }

    let status = backend
        .wait(&handle.job_name, poll_interval(&workflow), progress)
        .await
        .context("Failed while waiting for training job")?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "job": handle, "status": status }))?);
    }
    finish(&handle.job_name, &status, !json_output)
}

fn finish(job_name: &JobName, status: &JobStatus, verbose: bool) -> Result<()> {
    match status.state {
        TrainingJobState::Failed => anyhow::bail!("Training job {job_name} failed: {status}"),
        _ if !verbose => Ok(()),
        TrainingJobState::Completed => {
            if let Some(ref artifacts) = status.model_artifacts {
                println!("  Model artifacts: {}", artifacts.cyan());
            }
            Ok(())
        }
        _ => {
            println!("  {}", format!("Job {job_name} ended as {status}").yellow());
            Ok(())
        }
    }
}

async fn status(config_path: Option<&Path>, job_name: String, json_output: bool) -> Result<()> {
    let workflow = config::load_or_default(config_path)?;
    let backend = backend(&workflow).await?;
    let job_name = JobName(job_name);
    let status = backend
        .describe(&job_name)
        .await
        .with_context(|| format!("Failed to describe training job {job_name}"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "job_name": job_name, "status": status }))?);
        return Ok(());
    }

    let state = match status.state {
        TrainingJobState::Completed => status.to_string().green(),
        TrainingJobState::Failed => status.to_string().red(),
        TrainingJobState::Stopping | TrainingJobState::Stopped => status.to_string().yellow(),
        TrainingJobState::InProgress => status.to_string().cyan(),
    };
    println!("  {}: {}", job_name.as_str().bold(), state);
    if let Some(ref artifacts) = status.model_artifacts {
        println!("  Model artifacts: {}", artifacts.dimmed());
    }
    Ok(())
}

async fn wait(config_path: Option<&Path>, job_name: String) -> Result<()> {
    let workflow = config::load_or_default(config_path)?;
    let backend = backend(&workflow).await?;
    let job_name = JobName(job_name);
    let status = backend
        .wait(&job_name, poll_interval(&workflow), &StdoutProgressSink)
        .await
        .with_context(|| format!("Failed while waiting for training job {job_name}"))?;
    finish(&job_name, &status, true)
}

async fn stop(config_path: Option<&Path>, job_name: String) -> Result<()> {
    let workflow = config::load_or_default(config_path)?;
    let backend = backend(&workflow).await?;
    let job_name = JobName(job_name);
    backend.stop(&job_name).await.with_context(|| format!("Failed to stop training job {job_name}"))?;
    println!("  {} {}", "Stop requested:".yellow(), job_name.as_str().cyan());
    Ok(())
}
