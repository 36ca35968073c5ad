//! Mount supervisor
//!
//! Wraps the cloud-backed mount with health-check and remount semantics:
//! `Unmounted -> Mounting -> Mounted -> (Healthy | Degraded) -> Unmounted`.
//! A fixed-interval check re-probes readability; on failure it attempts
//! exactly one remount per cycle, then escalates to the alert sink and
//! leaves the Degraded state for the next cycle. Never a tight retry loop.

use crate::error::Result;
use crate::ports::{AlertLevel, AlertSinkRef, MountOptions, RemoteStoreRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

// =============================================================================
// State
// =============================================================================

/// Supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Healthy,
    Degraded,
}

impl std::fmt::Display for MountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountState::Unmounted => write!(f, "unmounted"),
            MountState::Mounting => write!(f, "mounting"),
            MountState::Mounted => write!(f, "mounted"),
            MountState::Healthy => write!(f, "healthy"),
            MountState::Degraded => write!(f, "degraded"),
        }
    }
}

/// What one health-check cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Probe succeeded first try
    Healthy,
    /// Probe failed, the single remount attempt recovered the mount
    Remounted,
    /// Probe and remount both failed; escalated, left for the next cycle
    Degraded,
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Remote to mount (e.g. "crypt-share:lab")
    pub remote: String,
    /// Local mountpoint
    pub mountpoint: PathBuf,
    /// Mount tuning, including the cache budget from the capacity plan
    pub options: MountOptions,
    /// Bound on the readability probe
    pub probe_timeout: Duration,
    /// Fixed health-check interval
    pub check_interval: Duration,
}

// =============================================================================
// Supervisor
// =============================================================================

/// Supervises the cloud-backed mount
pub struct MountSupervisor {
    config: SupervisorConfig,
    store: RemoteStoreRef,
    alerts: AlertSinkRef,
    state: Mutex<MountState>,
    shutdown: Notify,
}

impl MountSupervisor {
    pub fn new(config: SupervisorConfig, store: RemoteStoreRef, alerts: AlertSinkRef) -> Self {
        Self {
            config,
            store,
            alerts,
            state: Mutex::new(MountState::Unmounted),
            shutdown: Notify::new(),
        }
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    fn set_state(&self, state: MountState) {
        *self.state.lock() = state;
    }

    /// Issue the mount and run the initial readability probe.
    pub async fn start(&self) -> Result<()> {
        self.set_state(MountState::Mounting);
        std::fs::create_dir_all(&self.config.mountpoint)?;

        if let Err(e) = self
            .store
            .mount(&self.config.remote, &self.config.mountpoint, &self.config.options)
            .await
        {
            self.set_state(MountState::Unmounted);
            return Err(e);
        }
        self.set_state(MountState::Mounted);

        if self.probe().await {
            self.set_state(MountState::Healthy);
            info!(mountpoint = %self.config.mountpoint.display(), "cloud mount healthy");
        } else {
            self.set_state(MountState::Degraded);
            warn!(mountpoint = %self.config.mountpoint.display(), "cloud mount unreadable after mount");
        }
        Ok(())
    }

    /// Bounded-time readability probe: list the mount root.
    async fn probe(&self) -> bool {
        let path = self.config.mountpoint.clone();
        let listing = tokio::task::spawn_blocking(move || {
            std::fs::read_dir(&path).map(|mut entries| {
                // Force one entry read so a dead FUSE daemon cannot fake success
                let _ = entries.next();
            })
        });
        matches!(
            timeout(self.config.probe_timeout, listing).await,
            Ok(Ok(Ok(())))
        )
    }

    /// One health-check cycle: probe, at most one remount, escalate.
    pub async fn check_cycle(&self) -> CheckOutcome {
        if self.probe().await {
            self.set_state(MountState::Healthy);
            return CheckOutcome::Healthy;
        }

        warn!(
            mountpoint = %self.config.mountpoint.display(),
            "readability probe failed, attempting one remount"
        );
        self.set_state(MountState::Degraded);

        // Best-effort teardown; a wedged mount may refuse to unmount
        if let Err(e) = self.store.unmount(&self.config.mountpoint).await {
            warn!("unmount before remount failed: {e}");
        }

        let remounted = self
            .store
            .mount(&self.config.remote, &self.config.mountpoint, &self.config.options)
            .await
            .is_ok();

        if remounted && self.probe().await {
            self.set_state(MountState::Healthy);
            info!("remount recovered the cloud mount");
            return CheckOutcome::Remounted;
        }

        let message = format!(
            "cloud mount {} unresponsive and remount failed; will retry next cycle",
            self.config.mountpoint.display()
        );
        if let Err(e) = self.alerts.send(AlertLevel::Critical, &message).await {
            warn!("alert delivery failed: {e}");
        }
        CheckOutcome::Degraded
    }

    /// Run the supervision loop until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = sleep(self.config.check_interval) => {
                    self.check_cycle().await;
                }
            }
        }
        self.teardown().await
    }

    /// Signal the supervision loop to unmount and exit.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Unmount cleanly and return to Unmounted.
    pub async fn teardown(&self) -> Result<()> {
        self.store.unmount(&self.config.mountpoint).await?;
        self.set_state(MountState::Unmounted);
        info!(mountpoint = %self.config.mountpoint.display(), "cloud mount stopped");
        Ok(())
    }
}

impl From<&crate::config::ProvisionConfig> for SupervisorConfig {
    fn from(config: &crate::config::ProvisionConfig) -> Self {
        Self {
            remote: config.remote_name.clone(),
            mountpoint: config.cloud_mountpoint.clone(),
            options: MountOptions {
                cache_budget_bytes: 0, // filled from the capacity plan
                cache_dir: config.cloud_cache_dir.display().to_string(),
                cache_max_age_days: config.cache_max_age_days,
                bandwidth_limit: config.bandwidth_limit.clone(),
                chunk_size: config.chunk_size.clone(),
            },
            probe_timeout: Duration::from_secs(15),
            check_interval: Duration::from_secs(config.health_interval_secs),
        }
    }
}
