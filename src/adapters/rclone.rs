//! rclone adapter for the remote-object-store port
//!
//! The mount runs daemonized with a VFS write-back cache bounded by the
//! capacity plan's budget and an age-based eviction limit.

use crate::error::Result;
use crate::exec::{run_checked, CommandRunnerRef};
use crate::ports::{MountOptions, RemoteStore};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Drives a cloud remote through the rclone CLI
pub struct RcloneStore {
    runner: CommandRunnerRef,
}

impl RcloneStore {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }

    fn mount_args(remote: &str, local: &Path, options: &MountOptions) -> Vec<String> {
        let mut args = vec![
            "mount".to_string(),
            remote.to_string(),
            local.display().to_string(),
            "--daemon".to_string(),
            "--allow-other".to_string(),
            "--vfs-cache-mode".to_string(),
            "full".to_string(),
            "--cache-dir".to_string(),
            options.cache_dir.clone(),
            "--vfs-cache-max-size".to_string(),
            options.cache_budget_bytes.to_string(),
            "--vfs-cache-max-age".to_string(),
            format!("{}d", options.cache_max_age_days),
        ];
        if let Some(ref limit) = options.bandwidth_limit {
            args.push("--bwlimit".to_string());
            args.push(limit.clone());
        }
        if let Some(ref chunk) = options.chunk_size {
            args.push("--vfs-read-chunk-size".to_string());
            args.push(chunk.clone());
        }
        args
    }
}

#[async_trait]
impl RemoteStore for RcloneStore {
    async fn list_dir(&self, remote_dir: &str) -> Result<Vec<String>> {
        let output =
            run_checked(self.runner.as_ref(), "rclone", &["lsf", remote_dir]).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn copy(&self, local: &Path, remote_dir: &str) -> Result<()> {
        let local = local.display().to_string();
        run_checked(
            self.runner.as_ref(),
            "rclone",
            &["copy", local.as_str(), remote_dir],
        )
        .await?;
        Ok(())
    }

    async fn mount(&self, remote: &str, local: &Path, options: &MountOptions) -> Result<()> {
        let args = Self::mount_args(remote, local, options);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked(self.runner.as_ref(), "rclone", &arg_refs).await?;
        info!(remote, local = %local.display(), budget = options.cache_budget_bytes, "cloud mount issued");
        Ok(())
    }

    async fn unmount(&self, local: &Path) -> Result<()> {
        let local = local.display().to_string();
        // Lazy unmount so a wedged FUSE daemon cannot block teardown
        run_checked(self.runner.as_ref(), "fusermount", &["-uz", local.as_str()]).await?;
        Ok(())
    }
}
