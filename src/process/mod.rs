use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{ErrorKind, StrategyError};

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Process execution facility used by the tool-based strategies.
///
/// Implementations must enforce `timeout` and must not leave the child
/// running when the returned future is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, StrategyError>;
}

/// Runs commands with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, StrategyError> {
        tracing::debug!("Running {} {}", program, args.join(" "));

        // kill_on_drop covers both the timeout path and caller cancellation
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::PermissionDenied
                {
                    ErrorKind::ToolUnavailable
                } else {
                    ErrorKind::MalformedResponse
                };
                StrategyError::new(kind, format!("failed to start {}: {}", program, e))
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.status.code(),
            }),
            Ok(Err(e)) => Err(StrategyError::malformed(format!(
                "failed to collect output of {}: {}",
                program, e
            ))),
            Err(_) => Err(StrategyError::new(
                ErrorKind::NetworkTimeout,
                format!("{} timed out after {}s", program, timeout.as_secs()),
            )),
        }
    }
}
