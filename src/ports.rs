//! Collaborator ports
//!
//! Trait boundaries between the provisioner and the external systems it
//! drives: the alerting sink, the container runtime, and the remote object
//! store. Adapters implement these traits to provide concrete functionality.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// Alerting
// =============================================================================

/// Severity accepted by the alerting sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Success,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
            AlertLevel::Success => write!(f, "success"),
        }
    }
}

/// Port for operator notification
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, level: AlertLevel, message: &str) -> Result<()>;
}

pub type AlertSinkRef = Arc<dyn AlertSink>;

/// Default sink: alerts land in the structured log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, level: AlertLevel, message: &str) -> Result<()> {
        match level {
            AlertLevel::Critical => error!(alert = %level, "{message}"),
            AlertLevel::Warning => warn!(alert = %level, "{message}"),
            AlertLevel::Info | AlertLevel::Success => info!(alert = %level, "{message}"),
        }
        Ok(())
    }
}

// =============================================================================
// Container Runtime
// =============================================================================

/// Port for the workload-container collaborator (pause/resume around
/// snapshot-consistent operations)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// IDs of running containers whose name matches `pattern`
    async fn list_running(&self, pattern: &str) -> Result<Vec<String>>;

    async fn pause(&self, id: &str) -> Result<()>;

    async fn resume(&self, id: &str) -> Result<()>;
}

pub type ContainerRuntimeRef = Arc<dyn ContainerRuntime>;

// =============================================================================
// Remote Object Store
// =============================================================================

/// Tuning for the cloud-backed mount; opaque to the planner, passed through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountOptions {
    /// Write-back cache budget in bytes (from the capacity plan)
    pub cache_budget_bytes: u64,
    /// Local on-disk cache directory
    pub cache_dir: String,
    /// Age-based cache eviction bound
    pub cache_max_age_days: u32,
    /// Bandwidth cap (e.g. "40M"), when set
    pub bandwidth_limit: Option<String>,
    /// Transfer chunk size (e.g. "64M"), when set
    pub chunk_size: Option<String>,
}

/// Port for the remote object storage client
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List entries directly under `remote_dir`
    async fn list_dir(&self, remote_dir: &str) -> Result<Vec<String>>;

    /// Copy a local path into the remote
    async fn copy(&self, local: &Path, remote_dir: &str) -> Result<()>;

    /// Mount `remote` at `local`, backed by a bounded local cache
    async fn mount(&self, remote: &str, local: &Path, options: &MountOptions) -> Result<()>;

    /// Cleanly unmount `local`
    async fn unmount(&self, local: &Path) -> Result<()>;
}

pub type RemoteStoreRef = Arc<dyn RemoteStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_display() {
        assert_eq!(format!("{}", AlertLevel::Info), "info");
        assert_eq!(format!("{}", AlertLevel::Critical), "critical");
        assert_eq!(format!("{}", AlertLevel::Success), "success");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_all_levels() {
        let sink = LogAlertSink;
        for level in [
            AlertLevel::Info,
            AlertLevel::Warning,
            AlertLevel::Critical,
            AlertLevel::Success,
        ] {
            sink.send(level, "test").await.unwrap();
        }
    }
}
