//! bcache tier operations
//!
//! Creates the cache set on the fast partition, attaches backing devices,
//! and asserts the cache mode. All sysfs interaction goes through a
//! configurable root so tests run against a tempdir; bcache-tools commands
//! go through the [`CommandRunner`] port.
//!
//! bcache does not persist `cache_mode` across reboots, so the mode write is
//! exposed separately ([`CacheTier::assert_mode`]) and re-run from a boot-time
//! job registered by the pool builder.

use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandRunnerRef};
use crate::retry::wait_until;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// How long to poll for kernel-side device registration
const APPEAR_POLL_INTERVAL: Duration = Duration::from_secs(1);
const APPEAR_POLL_ATTEMPTS: u32 = 60;

// =============================================================================
// Cache Mode
// =============================================================================

/// Caching mode for the bcache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Acknowledge on cache hit, flush asynchronously. Fastest; assumes a UPS.
    WriteBack,
    /// Write to cache and backing before acknowledging
    WriteThrough,
    /// Bypass cache on writes, cache reads only
    WriteAround,
    /// Caching disabled
    None,
}

impl CacheMode {
    /// Token the kernel expects in the cache_mode sysfs attribute
    pub fn sysfs_token(self) -> &'static str {
        match self {
            CacheMode::WriteBack => "writeback",
            CacheMode::WriteThrough => "writethrough",
            CacheMode::WriteAround => "writearound",
            CacheMode::None => "none",
        }
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sysfs_token())
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "writeback" => Ok(CacheMode::WriteBack),
            "writethrough" => Ok(CacheMode::WriteThrough),
            "writearound" => Ok(CacheMode::WriteAround),
            "none" => Ok(CacheMode::None),
            other => Err(Error::UnknownCacheMode(other.to_string())),
        }
    }
}

// =============================================================================
// Attach State
// =============================================================================

/// Whether a backing device is already attached to a cache set.
///
/// Probed explicitly rather than inferred from command output: an attach
/// against a foreign set must abort, not be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachState {
    NotAttached,
    AttachedToThisSet,
    AttachedToOtherSet { cset: String },
}

// =============================================================================
// Cache Tier
// =============================================================================

/// bcache cache-set operations for one fast device
pub struct CacheTier {
    runner: CommandRunnerRef,
    /// sysfs root, overridable for tests
    sysfs_root: PathBuf,
}

impl CacheTier {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self::with_sysfs_root(runner, PathBuf::from("/sys"))
    }

    pub fn with_sysfs_root(runner: CommandRunnerRef, sysfs_root: PathBuf) -> Self {
        Self { runner, sysfs_root }
    }

    /// Create the cache set on `cache_device` and wait for it to register.
    ///
    /// Returns the cache-set UUID backing devices attach to.
    pub async fn create_cache_set(&self, cache_device: &str) -> Result<String> {
        info!(device = cache_device, "creating bcache cache set");
        let output = run_checked(
            self.runner.as_ref(),
            "make-bcache",
            &["-C", cache_device],
        )
        .await?;

        let cset = Self::parse_set_uuid(&output.stdout).ok_or_else(|| {
            Error::DeviceScan(format!(
                "make-bcache produced no Set UUID for {cache_device}"
            ))
        })?;

        let cset_dir = self.sysfs_root.join("fs/bcache").join(&cset);
        wait_until(
            "cache set registration",
            APPEAR_POLL_INTERVAL,
            APPEAR_POLL_ATTEMPTS,
            || {
                let dir = cset_dir.clone();
                async move { dir.exists() }
            },
        )
        .await
        .map_err(|t| Error::CacheInitTimeout {
            cset: cset.clone(),
            waited_secs: t.waited_secs(),
        })?;

        info!(cset = %cset, "cache set registered");
        Ok(cset)
    }

    /// Format `device` as a bcache backing device and wait for its
    /// /dev/bcacheN node, returning that wrapped path.
    pub async fn create_backing(&self, device: &str) -> Result<String> {
        info!(device, "creating bcache backing device");
        run_checked(self.runner.as_ref(), "make-bcache", &["-B", device]).await?;

        let name = device.trim_start_matches("/dev/").to_string();
        let bcache_dir = self
            .sysfs_root
            .join("class/block")
            .join(&name)
            .join("bcache");

        wait_until(
            "backing device registration",
            APPEAR_POLL_INTERVAL,
            APPEAR_POLL_ATTEMPTS,
            || {
                let dir = bcache_dir.clone();
                async move { dir.exists() }
            },
        )
        .await
        .map_err(|t| Error::BackingDeviceTimeout {
            device: device.to_string(),
            waited_secs: t.waited_secs(),
        })?;

        self.wrapped_path(&name)
    }

    /// Resolve /dev/bcacheN for a registered backing device
    fn wrapped_path(&self, backing_name: &str) -> Result<String> {
        let dev_link = self
            .sysfs_root
            .join("class/block")
            .join(backing_name)
            .join("bcache/dev");
        let resolved = fs::read_link(&dev_link)
            .or_else(|_| fs::canonicalize(&dev_link))
            .map_err(|e| {
                Error::DeviceScan(format!(
                    "cannot resolve bcache node for {backing_name}: {e}"
                ))
            })?;
        let node = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::DeviceScan(format!("empty bcache node link for {backing_name}"))
            })?;
        Ok(format!("/dev/{node}"))
    }

    /// Probe whether `device` is already attached, and to which set.
    pub fn attach_state(&self, device: &str, cset: &str) -> AttachState {
        let name = device.trim_start_matches("/dev/");
        let cache_link = self
            .sysfs_root
            .join("class/block")
            .join(name)
            .join("bcache/cache");
        match fs::read_link(&cache_link).or_else(|_| fs::canonicalize(&cache_link)) {
            Ok(target) => {
                let attached = target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if attached == cset {
                    AttachState::AttachedToThisSet
                } else {
                    AttachState::AttachedToOtherSet { cset: attached }
                }
            }
            Err(_) => AttachState::NotAttached,
        }
    }

    /// Attach a registered backing device to the cache set.
    ///
    /// Already-attached-to-this-set is a no-op; attached to a foreign set is
    /// a hard error requiring operator intervention.
    pub async fn attach(&self, device: &str, cset: &str) -> Result<()> {
        match self.attach_state(device, cset) {
            AttachState::AttachedToThisSet => {
                debug!(device, "already attached to this cache set, skipping");
                return Ok(());
            }
            AttachState::AttachedToOtherSet { cset: other } => {
                return Err(Error::CacheAttachConflict {
                    device: device.to_string(),
                    cset: other,
                });
            }
            AttachState::NotAttached => {}
        }

        let name = device.trim_start_matches("/dev/");
        let attach_path = self
            .sysfs_root
            .join("class/block")
            .join(name)
            .join("bcache/attach");
        fs::write(&attach_path, cset)?;
        info!(device, cset, "attached backing device to cache set");
        Ok(())
    }

    /// Write the cache mode for a backing device.
    ///
    /// Safe to re-run at every boot; bcache forgets this across reboots.
    pub fn assert_mode(&self, device: &str, mode: CacheMode) -> Result<()> {
        let name = device.trim_start_matches("/dev/");
        let mode_path = self
            .sysfs_root
            .join("class/block")
            .join(name)
            .join("bcache/cache_mode");
        fs::write(&mode_path, mode.sysfs_token())?;
        debug!(device, mode = %mode, "cache mode asserted");
        Ok(())
    }

    /// Pull `Set UUID: <uuid>` out of make-bcache output
    fn parse_set_uuid(stdout: &str) -> Option<String> {
        for line in stdout.lines() {
            if let Some(rest) = line.trim().strip_prefix("Set UUID:") {
                let uuid = rest.trim();
                if !uuid.is_empty() {
                    return Some(uuid.to_string());
                }
            }
        }
        None
    }
}
