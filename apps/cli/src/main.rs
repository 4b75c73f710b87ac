//! Sagedet CLI - object-detection training on SageMaker
//!
//! This CLI provides a `sagedet` command that walks the training workflow:
//! environment checks, asset preparation, checkpoint acquisition, and job
//! submission and monitoring.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{assets, checkpoints, doctor, image, init, job, logs, role};

/// Sagedet CLI - stage and launch object-detection training jobs
#[derive(Parser, Debug)]
#[command(
    name = "sagedet",
    author,
    version,
    about = "Sagedet - object-detection training on SageMaker",
    long_about = "Sagedet prepares training assets, fetches pretrained checkpoints and submits\n\
                  object-detection training jobs to SageMaker, driven by a sagedet.toml workflow file."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Workflow file (defaults to the nearest sagedet.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter sagedet.toml
    Init {
        /// Target directory (defaults to the current directory)
        path: Option<PathBuf>,

        /// Overwrite an existing sagedet.toml
        #[arg(long)]
        force: bool,
    },

    /// Check external tools and workspace state
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the execution role training jobs run as
    Role {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clone the model repository and copy entry points into the build context
    Assets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build or inspect the training container image
    #[command(subcommand)]
    Image(image::ImageCommand),

    /// Download and extract pretrained checkpoints
    #[command(subcommand)]
    Checkpoints(checkpoints::CheckpointsCommand),

    /// Plan, submit and track training jobs
    #[command(subcommand)]
    Job(job::JobCommand),

    /// Serve TensorBoard against a job's remote event files
    Logs {
        /// S3 log directory (defaults to job.tensorboard_output_path)
        log_dir: Option<String>,

        /// Local port
        #[arg(long, default_value_t = sagedet_training::logs::DEFAULT_TENSORBOARD_PORT)]
        port: u16,

        /// Bind address
        #[arg(long, default_value = "localhost")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };
    let config_path = args.config.as_deref();

    match command {
        Command::Init { path, force } => init::execute(path, force)?,
        Command::Doctor { json } => doctor::execute(config_path, json).await?,
        Command::Role { json } => role::execute(config_path, json).await?,
        Command::Assets { json } => assets::execute(config_path, json).await?,
        Command::Image(cmd) => image::execute(cmd, config_path).await?,
        Command::Checkpoints(cmd) => checkpoints::execute(cmd, config_path).await?,
        Command::Job(cmd) => job::execute(cmd, config_path).await?,
        Command::Logs { log_dir, port, host } => logs::execute(config_path, log_dir, port, host).await?,
    }

    Ok(())
}
