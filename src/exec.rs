//! External command execution
//!
//! Every system tool (wipefs, make-bcache, mkfs.btrfs, mount, blkid, docker,
//! rclone) is invoked through the [`CommandRunner`] port so the provisioning
//! stages can be exercised against a scripted runner in tests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit status code (-1 when terminated by signal)
    pub status: i32,
    /// Captured stdout, lossily decoded
    pub stdout: String,
    /// Captured stderr, lossily decoded
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Port for running external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing output. A non-zero exit is
    /// returned as `Ok` with the status; spawn failures are `Err`.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput>;
}

pub type CommandRunnerRef = Arc<dyn CommandRunner>;

/// Convenience wrapper: run and map a non-zero exit to [`Error::CommandFailed`].
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CmdOutput> {
    let output = runner.run(program, args).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

// =============================================================================
// System Runner
// =============================================================================

/// Runs commands on the host via `tokio::process`
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput> {
        debug!(program, ?args, "running command");
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        Ok(CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// =============================================================================
// Scripted Runner (test support)
// =============================================================================


#[cfg(test)]
mod tests {
    use super::testing::{Scripted, ScriptedRunner};
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_run_checked_maps_failure() {
        let runner = ScriptedRunner::new(vec![Scripted {
            program: "wipefs".into(),
            status: 1,
            stdout: String::new(),
        }]);
        let err = run_checked(&runner, "wipefs", &["-a", "/dev/sdb"])
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandFailed { status: 1, .. });
    }

    #[tokio::test]
    async fn test_runner_records_calls() {
        let runner = ScriptedRunner::all_ok();
        run_checked(&runner, "mount", &["/srv/pool"]).await.unwrap();
        let calls = runner.recorded();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "mount");
    }
}
