//! Pool builder
//!
//! Orchestrates the destructive provisioning sequence: confirmation gate,
//! idempotency probe, signature wipe, cache tier, filesystem creation,
//! mount + persistent-mount entry, canonical layout, recurring jobs. Each
//! step's failure aborts the remainder; partial state is reported, never
//! rolled back automatically.

use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandRunnerRef};
use crate::inventory::BlockDevice;
use crate::pool::planner;
use crate::pool::{CacheMode, CacheTier, CacheTierPlan};
use crate::retry::wait_until;
use crate::topology;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Canonical directory layout inside the pool: (name, mode)
const POOL_LAYOUT: [(&str, u32); 4] = [
    ("home", 0o755),
    ("workspace", 0o775),
    ("shared-cache", 0o1777),
    ("snapshots", 0o700),
];

/// How long to poll for a freshly carved partition to register
const PARTITION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PARTITION_POLL_ATTEMPTS: u32 = 30;

/// Fast-device input to the build: a whole device the builder carves per the
/// caching-tier plan, or a partition the operator carved ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastTarget {
    Device(BlockDevice),
    Partition(String),
}

impl FastTarget {
    pub fn path(&self) -> &str {
        match self {
            FastTarget::Device(device) => &device.path,
            FastTarget::Partition(path) => path,
        }
    }
}

/// Outcome of a build run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildOutcome {
    /// Pool created, mounted, and registered
    Provisioned {
        uuid: String,
        devices: Vec<String>,
    },
    /// A btrfs pool is already mounted at the target; nothing was touched
    AlreadyProvisioned { source: String },
}

/// Builds the redundant pool on a single host
pub struct PoolBuilder {
    config: ProvisionConfig,
    runner: CommandRunnerRef,
    cache: CacheTier,
    fstab_path: PathBuf,
    cron_dir: PathBuf,
    /// Config file path baked into generated job entries
    config_path: PathBuf,
    /// sysfs root, overridable for tests
    sysfs_root: PathBuf,
}

impl PoolBuilder {
    pub fn new(config: ProvisionConfig, runner: CommandRunnerRef) -> Self {
        let cache = CacheTier::new(runner.clone());
        Self::with_paths(
            config,
            runner,
            cache,
            PathBuf::from("/etc/fstab"),
            PathBuf::from("/etc/cron.d"),
            PathBuf::from("/etc/poolsmith.conf"),
            PathBuf::from("/sys"),
        )
    }

    pub fn with_paths(
        config: ProvisionConfig,
        runner: CommandRunnerRef,
        cache: CacheTier,
        fstab_path: PathBuf,
        cron_dir: PathBuf,
        config_path: PathBuf,
        sysfs_root: PathBuf,
    ) -> Self {
        Self {
            config,
            runner,
            cache,
            fstab_path,
            cron_dir,
            config_path,
            sysfs_root,
        }
    }

    /// Run the full provisioning sequence.
    ///
    /// `confirmed` is the destructive gate: the caller has either collected
    /// an interactive "yes" or was given the explicit non-interactive flag.
    /// It is checked before any side effect.
    pub async fn build(
        &self,
        backing_devices: &[String],
        fast: Option<&FastTarget>,
        confirmed: bool,
    ) -> Result<BuildOutcome> {
        if !confirmed {
            return Err(Error::ConfirmationDeclined);
        }

        topology::validate(self.config.redundancy, backing_devices.len())?;

        let caching = fast.is_some() && self.config.cache_mode != CacheMode::None;

        // The split is planned up front so an impossible OS reservation
        // aborts before anything is wiped.
        if caching {
            if let Some(FastTarget::Device(device)) = fast {
                planner::plan(
                    device,
                    self.config.os_reserve_bytes,
                    self.config.minimum_cache_bytes,
                )?;
            }
        }

        // Idempotency: a pool already mounted at the target means re-running
        // must not wipe anything.
        if let Some(source) = self.mounted_source().await? {
            info!(
                mountpoint = %self.config.pool_mountpoint.display(),
                source = %source,
                "pool already mounted, skipping destructive steps"
            );
            return Ok(BuildOutcome::AlreadyProvisioned { source });
        }

        // Wipe existing filesystem signatures on every target
        for device in backing_devices {
            info!(device, "wiping filesystem signatures");
            run_checked(self.runner.as_ref(), "wipefs", &["-a", device.as_str()]).await?;
        }
        if caching {
            let fast = fast.unwrap();
            run_checked(self.runner.as_ref(), "wipefs", &["-a", fast.path()]).await?;
        }

        // Cache tier: one cache set services all backing devices
        let pool_devices = if caching {
            let cache_partition = match fast.unwrap() {
                FastTarget::Device(device) => self.carve_cache_partition(device).await?,
                FastTarget::Partition(path) => path.clone(),
            };
            let cset = self.cache.create_cache_set(&cache_partition).await?;
            let mut wrapped = Vec::with_capacity(backing_devices.len());
            for device in backing_devices {
                let node = self.cache.create_backing(device).await?;
                self.cache.attach(device, &cset).await?;
                self.cache.assert_mode(device, self.config.cache_mode)?;
                wrapped.push(node);
            }
            wrapped
        } else {
            backing_devices.to_vec()
        };

        self.make_filesystem(&pool_devices).await?;
        let uuid = self.mount_and_register(&pool_devices).await?;
        self.create_layout()?;
        self.register_jobs(caching)?;

        info!(uuid = %uuid, "pool provisioned");
        Ok(BuildOutcome::Provisioned {
            uuid,
            devices: pool_devices,
        })
    }

    /// Source device of a btrfs filesystem mounted at the pool mountpoint
    async fn mounted_source(&self) -> Result<Option<String>> {
        let mountpoint = self.config.pool_mountpoint.display().to_string();
        let output = self
            .runner
            .run("findmnt", &["-n", "-o", "SOURCE,FSTYPE", mountpoint.as_str()])
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let mut fields = output.stdout.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(source), Some("btrfs")) => Ok(Some(source.to_string())),
            _ => Ok(None),
        }
    }

    /// Carve the fast device per the caching-tier plan: partition 1 takes
    /// the OS reservation, partition 2 becomes the cache. Waits for the
    /// kernel to publish the cache partition before handing it to bcache.
    async fn carve_cache_partition(&self, device: &BlockDevice) -> Result<String> {
        let split = planner::plan(
            device,
            self.config.os_reserve_bytes,
            self.config.minimum_cache_bytes,
        )?;
        self.apply_split(device, &split).await?;

        let partition = partition_name(&device.name, 2);
        let node = self.sysfs_root.join("class/block").join(&partition);
        wait_until(
            "cache partition registration",
            PARTITION_POLL_INTERVAL,
            PARTITION_POLL_ATTEMPTS,
            || {
                let node = node.clone();
                async move { node.exists() }
            },
        )
        .await
        .map_err(|t| Error::PartitionTimeout {
            device: format!("/dev/{partition}"),
            waited_secs: t.waited_secs(),
        })?;

        Ok(format!("/dev/{partition}"))
    }

    async fn apply_split(&self, device: &BlockDevice, split: &CacheTierPlan) -> Result<()> {
        let os_mib = split.os_partition_bytes / (1 << 20);
        info!(
            device = %device.path,
            os_mib,
            cache_bytes = split.cache_partition_bytes,
            "carving fast device"
        );
        run_checked(
            self.runner.as_ref(),
            "sgdisk",
            &["--zap-all", device.path.as_str()],
        )
        .await?;
        let os_span = format!("1:0:+{os_mib}M");
        run_checked(
            self.runner.as_ref(),
            "sgdisk",
            &[
                "-n",
                os_span.as_str(),
                "-t",
                "1:8300",
                "-n",
                "2:0:0",
                "-t",
                "2:8300",
                device.path.as_str(),
            ],
        )
        .await?;
        run_checked(self.runner.as_ref(), "partprobe", &[device.path.as_str()]).await?;
        Ok(())
    }

    async fn make_filesystem(&self, devices: &[String]) -> Result<()> {
        let mut args = vec![
            "-f",
            "-L",
            self.config.pool_label.as_str(),
            "-d",
            self.config.redundancy.data_profile(),
            "-m",
            self.config.redundancy.metadata_profile(),
        ];
        args.extend(devices.iter().map(String::as_str));
        info!(
            profile = self.config.redundancy.data_profile(),
            devices = devices.len(),
            "creating btrfs filesystem"
        );
        run_checked(self.runner.as_ref(), "mkfs.btrfs", &args).await?;
        Ok(())
    }

    /// Mount, verify, and write the UUID-keyed persistent-mount entry
    async fn mount_and_register(&self, devices: &[String]) -> Result<String> {
        let mountpoint = self.config.pool_mountpoint.display().to_string();
        fs::create_dir_all(&self.config.pool_mountpoint)?;

        let options = format!("compress={},noatime", self.config.compression);
        run_checked(
            self.runner.as_ref(),
            "mount",
            &["-o", options.as_str(), devices[0].as_str(), mountpoint.as_str()],
        )
        .await?;

        if self.mounted_source().await?.is_none() {
            return Err(Error::MountVerification {
                mountpoint: mountpoint.clone(),
            });
        }

        let uuid = self.filesystem_uuid(&devices[0]).await?;

        // Keyed by UUID, never by device path: /dev names move across boots.
        // nofail so a missing pool cannot hang boot.
        let entry = format!(
            "UUID={uuid} {mountpoint} btrfs {options},nofail,x-systemd.device-timeout=10 0 0\n"
        );
        self.append_fstab(&entry)?;
        info!(uuid = %uuid, "persistent mount entry written");
        Ok(uuid)
    }

    async fn filesystem_uuid(&self, device: &str) -> Result<String> {
        let output = run_checked(
            self.runner.as_ref(),
            "blkid",
            &["-s", "UUID", "-o", "value", device],
        )
        .await?;
        let uuid = output.stdout.trim().to_string();
        if uuid.is_empty() {
            return Err(Error::UuidNotFound {
                device: device.to_string(),
            });
        }
        Ok(uuid)
    }

    fn append_fstab(&self, entry: &str) -> Result<()> {
        let existing = fs::read_to_string(&self.fstab_path).unwrap_or_default();
        if existing.contains(entry.trim()) {
            return Ok(());
        }
        let mut contents = existing;
        contents.push_str(entry);
        fs::write(&self.fstab_path, contents)?;
        Ok(())
    }

    /// Canonical directory layout with fixed permission bits per area
    fn create_layout(&self) -> Result<()> {
        for (name, mode) in POOL_LAYOUT {
            let dir = self.config.pool_mountpoint.join(name);
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode))?;
        }
        info!("canonical pool layout created");
        Ok(())
    }

    /// Recurring scrub job plus, when caching, the boot-time cache-mode
    /// re-assert (bcache drops sysfs settings across reboots).
    fn register_jobs(&self, caching: bool) -> Result<()> {
        let mountpoint = self.config.pool_mountpoint.display();
        let config_path = self.config_path.display();
        let mut jobs = format!(
            "# generated by poolsmith\n0 3 1 * * root /usr/bin/btrfs scrub start -B {mountpoint}\n"
        );
        if caching {
            jobs.push_str(&format!(
                "@reboot root /usr/local/bin/poolsmith assert-cache-mode --config {config_path}\n"
            ));
        }
        fs::create_dir_all(&self.cron_dir)?;
        let path = self.cron_dir.join("poolsmith");
        fs::write(&path, jobs)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        info!(path = %path.display(), "recurring jobs registered");
        Ok(())
    }

    /// Re-assert the cache mode on every backing device.
    ///
    /// Invoked from the boot-time job; safe when the tier is not present
    /// (a missing sysfs node is a warning, not a failure).
    pub fn reassert_cache_mode(&self, backing_devices: &[String]) -> Result<()> {
        for device in backing_devices {
            if let Err(e) = self.cache.assert_mode(device, self.config.cache_mode) {
                warn!(device, "could not re-assert cache mode: {e}");
            }
        }
        Ok(())
    }
}

/// Kernel partition name for a disk: `nvme0n1` + 2 -> `nvme0n1p2`,
/// `sda` + 2 -> `sda2`
fn partition_name(disk: &str, index: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{index}")
    } else {
        format!("{disk}{index}")
    }
}

/// Expected usable pool capacity from raw device sizes and redundancy
pub fn estimated_capacity(device_sizes: &[u64], fraction: f64) -> u64 {
    let raw: u64 = device_sizes.iter().sum();
    (raw as f64 * fraction) as u64
}
