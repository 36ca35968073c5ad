//! Docker adapter for the container-runtime port

use crate::error::Result;
use crate::exec::{run_checked, CommandRunnerRef};
use crate::ports::ContainerRuntime;
use async_trait::async_trait;
use tracing::debug;

/// Drives workload containers through the docker CLI
pub struct DockerRuntime {
    runner: CommandRunnerRef,
}

impl DockerRuntime {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self, pattern: &str) -> Result<Vec<String>> {
        let filter = format!("name={pattern}");
        let output = run_checked(
            self.runner.as_ref(),
            "docker",
            &["ps", "-q", "--filter", filter.as_str()],
        )
        .await?;
        let ids: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        debug!(pattern, count = ids.len(), "listed running containers");
        Ok(ids)
    }

    async fn pause(&self, id: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), "docker", &["pause", id]).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), "docker", &["unpause", id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{Scripted, ScriptedRunner};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_running_parses_ids() {
        let runner = Arc::new(ScriptedRunner::new(vec![Scripted {
            program: "docker".into(),
            status: 0,
            stdout: "abc123\ndef456\n".into(),
        }]));
        let docker = DockerRuntime::new(runner);
        let ids = docker.list_running("jupyter-").await.unwrap();
        assert_eq!(ids, vec!["abc123", "def456"]);
    }

    #[tokio::test]
    async fn test_pause_invokes_docker() {
        let runner = Arc::new(ScriptedRunner::all_ok());
        let docker = DockerRuntime::new(runner.clone());
        docker.pause("abc123").await.unwrap();
        docker.resume("abc123").await.unwrap();
        let calls = runner.recorded();
        assert_eq!(calls[0].1, vec!["pause", "abc123"]);
        assert_eq!(calls[1].1, vec!["unpause", "abc123"]);
    }
}
