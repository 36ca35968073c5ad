//! Block device scanner
//!
//! Enumerates whole-disk block devices from sysfs and records the facts
//! classification needs: size, rotational flag, removable flag, transport.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Device Types
// =============================================================================

/// Bus the device is attached over, coarse-grained by bandwidth class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// PCIe-attached NVMe: highest-bandwidth class, preferred for caching
    Nvme,
    /// SATA/SAS disk
    Sata,
    Unknown,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Nvme => write!(f, "nvme"),
            Transport::Sata => write!(f, "sata"),
            Transport::Unknown => write!(f, "unknown"),
        }
    }
}

/// Immutable snapshot of a block device at inventory time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device path (e.g. /dev/nvme0n1)
    pub path: String,
    /// Kernel name (e.g. nvme0n1)
    pub name: String,
    /// Total capacity in bytes
    pub size_bytes: u64,
    /// Whether the device reports spinning media
    pub rotational: bool,
    /// Whether the device is removable media
    pub removable: bool,
    /// Attachment bus
    pub transport: Transport,
}

/// Full scan result with timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub devices: Vec<BlockDevice>,
    pub scanned_at: DateTime<Utc>,
}

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the device scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Minimum device size to include (bytes)
    pub min_size_bytes: u64,
    /// Path to sysfs (overridable for testing)
    pub sysfs_path: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1_000_000_000, // ignore sub-1GB devices
            sysfs_path: PathBuf::from("/sys"),
        }
    }
}

// =============================================================================
// Device Scanner
// =============================================================================

/// Scans block devices on Linux systems via sysfs
pub struct DeviceScanner {
    config: ScannerConfig,
}

impl DeviceScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn default_scanner() -> Self {
        Self::new(ScannerConfig::default())
    }

    /// Enumerate all whole-disk devices large enough to matter
    pub fn scan(&self) -> Result<ScanReport> {
        let block_path = self.config.sysfs_path.join("class/block");
        if !block_path.exists() {
            return Err(Error::DeviceScan(format!(
                "sysfs block path not found: {}",
                block_path.display()
            )));
        }

        let mut devices = Vec::new();
        for entry in fs::read_dir(&block_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if !Self::is_physical_disk(&name) {
                continue;
            }
            if self.is_partition(&entry.path()) {
                continue;
            }

            match self.scan_device(&entry.path(), &name) {
                Ok(device) => {
                    if device.size_bytes >= self.config.min_size_bytes {
                        debug!(
                            device = %device.path,
                            size = device.size_bytes,
                            rotational = device.rotational,
                            "found block device"
                        );
                        devices.push(device);
                    }
                }
                Err(e) => {
                    debug!(device = %name, "skipping unreadable device: {e}");
                }
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        info!("inventory found {} block devices", devices.len());

        Ok(ScanReport {
            devices,
            scanned_at: Utc::now(),
        })
    }

    fn scan_device(&self, sysfs_path: &Path, name: &str) -> Result<BlockDevice> {
        // Size is reported in 512-byte sectors regardless of block size
        let size_str = self.read_attr(sysfs_path, "size")?;
        let sectors: u64 = size_str
            .trim()
            .parse()
            .map_err(|_| Error::DeviceScan(format!("invalid size for {name}: {size_str}")))?;

        let rotational = self
            .read_attr(sysfs_path, "queue/rotational")
            .map(|s| s.trim() == "1")
            .unwrap_or(false);

        let removable = self
            .read_attr(sysfs_path, "removable")
            .map(|s| s.trim() == "1")
            .unwrap_or(false);

        Ok(BlockDevice {
            path: format!("/dev/{name}"),
            name: name.to_string(),
            size_bytes: sectors * 512,
            rotational,
            removable,
            transport: Self::transport_of(name),
        })
    }

    fn transport_of(name: &str) -> Transport {
        if name.starts_with("nvme") {
            Transport::Nvme
        } else if name.starts_with("sd") {
            Transport::Sata
        } else {
            Transport::Unknown
        }
    }

    /// Filter out virtual and composite devices
    fn is_physical_disk(name: &str) -> bool {
        const VIRTUAL_PREFIXES: [&str; 6] = ["loop", "ram", "dm-", "md", "zram", "bcache"];
        !VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    /// Partitions carry a "partition" attribute in sysfs
    fn is_partition(&self, sysfs_path: &Path) -> bool {
        sysfs_path.join("partition").exists()
    }

    fn read_attr(&self, base: &Path, attr: &str) -> Result<String> {
        let path = base.join(attr);
        fs::read_to_string(&path)
            .map_err(|e| Error::DeviceScan(format!("failed to read {}: {e}", path.display())))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    /// Build a fake sysfs block device under `root/class/block/<name>`
    pub fn fake_device(root: &Path, name: &str, size_bytes: u64, rotational: bool) {
        let dev = root.join("class/block").join(name);
        fs::create_dir_all(dev.join("queue")).unwrap();
        fs::write(dev.join("size"), format!("{}\n", size_bytes / 512)).unwrap();
        fs::write(
            dev.join("queue/rotational"),
            if rotational { "1\n" } else { "0\n" },
        )
        .unwrap();
        fs::write(dev.join("removable"), "0\n").unwrap();
    }

    pub fn fake_partition(root: &Path, name: &str) {
        let dev = root.join("class/block").join(name);
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("partition"), "1\n").unwrap();
        fs::write(dev.join("size"), "2097152\n").unwrap();
    }
}
