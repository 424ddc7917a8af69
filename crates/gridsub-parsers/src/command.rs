//! Command execution utilities for scheduler queries.

use std::future::Future;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or -1 when the process was killed by a signal.
    pub status: i32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, status: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            status,
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Return stdout, or a `Failed` error carrying stderr on non-zero exit.
    pub fn into_stdout(self, name: &str) -> Result<String, CommandError> {
        if !self.success() {
            return Err(CommandError::Failed {
                command: name.to_string(),
                stderr: self.stderr,
            });
        }
        Ok(self.stdout)
    }

    /// Stdout followed by stderr, as a user would see them on a terminal.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Something that can run a scheduler binary and capture its output.
///
/// A non-zero exit is not an error at this level; callers decide what a
/// failing exit code means for the tool they ran. Only a failure to start
/// the process at all is reported as [`CommandError::Execution`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &Path,
        args: &[String],
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// Runs commands as real subprocesses through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl CommandRunner for TokioRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        tracing::debug!("Running {} {}", program.display(), args.join(" "));

        let output = cmd.output().await.map_err(|e| CommandError::Execution {
            command: program.display().to_string(),
            error: e.to_string(),
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}
