//! Workload quiescing
//!
//! Pauses every matching container before a snapshot-consistent operation
//! and resumes every one of them afterwards, even when the operation fails.
//! No container may be left paused on error.

use crate::error::Result;
use crate::ports::ContainerRuntimeRef;
use std::future::Future;
use tracing::{info, warn};

/// Pause all containers matching `pattern`, run `operation`, then resume
/// them all. Resume failures are logged and do not mask the operation's
/// own result.
pub async fn with_paused<F, Fut, T>(
    runtime: &ContainerRuntimeRef,
    pattern: &str,
    operation: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let ids = runtime.list_running(pattern).await?;
    info!(pattern, count = ids.len(), "pausing workload containers");

    let mut paused = Vec::with_capacity(ids.len());
    for id in &ids {
        // A pause failure aborts, but whatever is paused so far must resume
        if let Err(e) = runtime.pause(id).await {
            resume_all(runtime, &paused).await;
            return Err(e);
        }
        paused.push(id.clone());
    }

    let result = operation().await;
    resume_all(runtime, &paused).await;
    result
}

async fn resume_all(runtime: &ContainerRuntimeRef, ids: &[String]) {
    for id in ids {
        if let Err(e) = runtime.resume(id).await {
            warn!(container = %id, "failed to resume container: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ports::ContainerRuntime;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeRuntime {
        running: Vec<String>,
        paused: Mutex<Vec<String>>,
        resumed: Mutex<Vec<String>>,
        fail_pause_of: Option<String>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(self.running.clone())
        }

        async fn pause(&self, id: &str) -> Result<()> {
            if self.fail_pause_of.as_deref() == Some(id) {
                return Err(Error::CommandFailed {
                    program: "docker".into(),
                    status: 1,
                    stderr: "pause failed".into(),
                });
            }
            self.paused.lock().push(id.to_string());
            Ok(())
        }

        async fn resume(&self, id: &str) -> Result<()> {
            self.resumed.lock().push(id.to_string());
            Ok(())
        }
    }

    fn runtime(running: &[&str], fail_pause_of: Option<&str>) -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime {
            running: running.iter().map(|s| s.to_string()).collect(),
            fail_pause_of: fail_pause_of.map(String::from),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_resumes_all_after_success() {
        let fake = runtime(&["a", "b"], None);
        let rt: ContainerRuntimeRef = fake.clone();
        let out = with_paused(&rt, "lab-", || async { Ok(42) }).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(*fake.resumed.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_resumes_all_even_when_operation_fails() {
        let fake = runtime(&["a", "b"], None);
        let rt: ContainerRuntimeRef = fake.clone();
        let result: Result<()> = with_paused(&rt, "lab-", || async {
            Err(Error::Configuration("backup failed".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*fake.resumed.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_partial_pause_failure_resumes_paused_subset() {
        let fake = runtime(&["a", "b", "c"], Some("b"));
        let rt: ContainerRuntimeRef = fake.clone();
        let result: Result<()> = with_paused(&rt, "lab-", || async { Ok(()) }).await;
        assert!(result.is_err());
        // "a" was paused before "b" failed; it must be resumed
        assert_eq!(*fake.resumed.lock(), vec!["a"]);
    }
}
