//! Subprocess execution with timeout and cancellation

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use bosun_core::{CommandResult, InstallError, Result};

/// Runs external programs, capturing output. Stateless and cheap to clone;
/// every component that shells out holds one.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute `program` with `args`, merging `envs` over the inherited
    /// process environment. Returns the captured result for any exit code;
    /// callers decide what non-zero means.
    ///
    /// Cancellation wins over the timeout: if `cancel` fires while the
    /// child is running, the child is killed and `Cancelled` is returned,
    /// never a generic failure.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &HashMap<String, String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        tracing::debug!(program, ?args, "spawning subprocess");

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                InstallError::ToolUnavailable {
                    tool: program.to_string(),
                }
            } else {
                InstallError::Io(e)
            }
        })?;

        // wait_with_output owns the child; dropping the future on the other
        // select arms kills the process via kill_on_drop.
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(program, "subprocess cancelled");
                return Err(InstallError::Cancelled);
            }
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(program, ?timeout, "subprocess timed out");
                return Err(InstallError::CommandTimeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            output = &mut wait => output?,
        };

        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(program, exit_code = result.exit_code, "subprocess finished");
        Ok(result)
    }

    /// Like `run`, but a non-zero exit is an error.
    pub async fn run_checked(
        &self,
        program: &str,
        args: &[String],
        envs: &HashMap<String, String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let result = self.run(program, args, envs, timeout, cancel).await?;
        if !result.success() {
            return Err(InstallError::CommandFailed {
                program: program.to_string(),
                exit_code: result.exit_code,
                stderr: result.message().to_string(),
            });
        }
        Ok(result)
    }

    /// Probe that `program` exists by invoking it with `probe_args` (a
    /// cheap no-op like `version --client`). Only a failed spawn counts as
    /// unavailable; a non-zero exit means the tool is present.
    pub async fn ensure_tool(
        &self,
        program: &str,
        probe_args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args: Vec<String> = probe_args.iter().map(|s| s.to_string()).collect();
        match self
            .run(program, &args, &HashMap::new(), Duration::from_secs(15), cancel)
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ InstallError::ToolUnavailable { .. }) => Err(e),
            Err(e @ InstallError::Cancelled) => Err(e),
            // Present but grumpy is still present.
            Err(_) => Ok(()),
        }
    }
}
