//! External command execution.
//!
//! Every stage of the workflow shells out to an external tool (`git`, `docker`,
//! `aws`, `tensorboard`). All of those calls go through [`CommandRunner`] so the
//! stages can be exercised without the tools installed.

use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), cwd: None, env: Vec::new(), stdin: None }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering used in logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| {
            if a.contains(char::is_whitespace) { format!("'{a}'") } else { a.clone() }
        }));
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { status_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { status_code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Converts a non-zero exit into [`TrainingError::Command`].
    pub fn into_result(self, program: &str) -> TrainingResult<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(TrainingError::Command {
            program: program.to_string(),
            status: self.status_code.map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}")),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, capturing stdout and stderr.
    async fn output(&self, spec: &CommandSpec) -> TrainingResult<CommandOutput>;

    /// Runs the command with the operator's terminal attached.
    async fn stream(&self, spec: &CommandSpec) -> TrainingResult<()>;

    /// Runs the command and returns stdout, failing on non-zero exit.
    async fn run(&self, spec: &CommandSpec) -> TrainingResult<String> {
        self.output(spec).await?.into_result(&spec.program)
    }
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

fn spawn_error(spec: &CommandSpec, err: &std::io::Error) -> TrainingError {
    TrainingError::Command {
        program: spec.program.clone(),
        status: "not started".to_string(),
        stderr: err.to_string(),
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn output(&self, spec: &CommandSpec) -> TrainingResult<CommandOutput> {
        debug!(command = %spec.display(), "running");

        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn().map_err(|e| spawn_error(spec, &e))?;
        if let Some(ref input) = spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
            }
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn stream(&self, spec: &CommandSpec) -> TrainingResult<()> {
        debug!(command = %spec.display(), "running (attached)");

        let mut cmd = spec.to_command();
        cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::inherit() });

        let mut child = cmd.spawn().map_err(|e| spawn_error(spec, &e))?;
        if let Some(ref input) = spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
            }
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(TrainingError::Command {
                program: spec.program.clone(),
                status: status.code().map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}")),
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

    /// Records every command and answers with a canned response.
    pub(crate) struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        respond: Responder,
    }

    impl RecordingRunner {
        pub(crate) fn new(respond: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static) -> Self {
            Self { calls: Mutex::new(Vec::new()), respond: Box::new(respond) }
        }

        pub(crate) fn ok() -> Self {
            Self::new(|_| CommandOutput::ok(""))
        }

        pub(crate) fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn programs(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c.display()).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn output(&self, spec: &CommandSpec) -> TrainingResult<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            Ok((self.respond)(spec))
        }

        async fn stream(&self, spec: &CommandSpec) -> TrainingResult<()> {
            self.output(spec).await?.into_result(&spec.program).map(|_| ())
        }
    }
}
