//! Device role classification
//!
//! Sorts scanned devices into the two roles the provisioner cares about:
//! a fast caching device (non-rotational, not backing the root filesystem)
//! and rotational pool devices (spinning, not the boot device). NVMe is
//! preferred over SATA SSDs for the fast role; the preference is a default,
//! overridable by an explicit device path in configuration.

use crate::error::{Error, Result};
use crate::inventory::BlockDevice;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Role a device can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Non-rotational caching candidate
    Fast,
    /// Spinning pool member
    Rotational,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Fast => write!(f, "fast"),
            DeviceKind::Rotational => write!(f, "rotational"),
        }
    }
}

/// Strip a partition suffix, yielding the parent disk name.
///
/// `nvme0n1p2` -> `nvme0n1`, `sda3` -> `sda`, whole disks pass through.
pub fn parent_disk(name: &str) -> String {
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            if name[idx + 1..].chars().all(|c| c.is_ascii_digit())
                && !name[idx + 1..].is_empty()
            {
                return name[..idx].to_string();
            }
        }
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Classified view over one scan
#[derive(Debug, Clone)]
pub struct Inventory {
    devices: Vec<BlockDevice>,
    /// Parent disk backing the root filesystem, if resolvable
    os_disk: Option<String>,
}

impl Inventory {
    /// Build from scanned devices and a mounts table (usually /proc/mounts).
    pub fn new(devices: Vec<BlockDevice>, mounts_path: &Path) -> Self {
        let os_disk = Self::find_os_disk(mounts_path);
        if let Some(ref disk) = os_disk {
            debug!(os_disk = %disk, "root filesystem device excluded from inventory");
        }
        Self { devices, os_disk }
    }

    /// Resolve the disk backing `/` (or `/boot`) from a mounts table
    fn find_os_disk(mounts_path: &Path) -> Option<String> {
        let table = fs::read_to_string(mounts_path).ok()?;
        for line in table.lines() {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            if (target == "/" || target == "/boot") && source.starts_with("/dev/") {
                let name = source.trim_start_matches("/dev/");
                return Some(parent_disk(name));
            }
        }
        None
    }

    fn is_os_disk(&self, device: &BlockDevice) -> bool {
        self.os_disk.as_deref() == Some(device.name.as_str())
    }

    /// Devices eligible for `kind`, best candidate first.
    pub fn candidates(&self, kind: DeviceKind) -> Vec<BlockDevice> {
        let mut matches: Vec<BlockDevice> = self
            .devices
            .iter()
            .filter(|d| !d.removable && !self.is_os_disk(d))
            .filter(|d| match kind {
                DeviceKind::Fast => !d.rotational,
                DeviceKind::Rotational => d.rotational,
            })
            .cloned()
            .collect();

        if kind == DeviceKind::Fast {
            // NVMe before SATA SSD, larger first within a class
            matches.sort_by(|a, b| {
                a.transport
                    .cmp(&b.transport)
                    .then(b.size_bytes.cmp(&a.size_bytes))
            });
        }
        matches
    }

    /// Best candidate for `kind`, failing when auto-detection finds nothing.
    ///
    /// Only called when no explicit device path is configured; an explicit
    /// path bypasses classification entirely.
    pub fn require(&self, kind: DeviceKind) -> Result<BlockDevice> {
        self.candidates(kind)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoDeviceFound {
                kind: kind.to_string(),
            })
    }

    /// All devices in the inventory
    pub fn devices(&self) -> &[BlockDevice] {
        &self.devices
    }

    /// Look up a device by its /dev path (for explicit configuration)
    pub fn by_path(&self, path: &str) -> Result<BlockDevice> {
        self.devices
            .iter()
            .find(|d| d.path == path)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                device: path.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Transport;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GB: u64 = 1_000_000_000;

    fn dev(name: &str, size: u64, rotational: bool, transport: Transport) -> BlockDevice {
        BlockDevice {
            path: format!("/dev/{name}"),
            name: name.to_string(),
            size_bytes: size,
            rotational,
            removable: false,
            transport,
        }
    }

    fn mounts_file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_parent_disk() {
        assert_eq!(parent_disk("nvme0n1p2"), "nvme0n1");
        assert_eq!(parent_disk("nvme0n1"), "nvme0n1");
        assert_eq!(parent_disk("sda3"), "sda");
        assert_eq!(parent_disk("sda"), "sda");
        assert_eq!(parent_disk("mmcblk0p1"), "mmcblk0");
    }

    #[test]
    fn test_root_disk_excluded_from_fast_candidates() {
        let mounts = mounts_file("/dev/nvme0n1p2 / ext4 rw 0 0\n");
        let inventory = Inventory::new(
            vec![
                dev("nvme0n1", 1_000 * GB, false, Transport::Nvme),
                dev("nvme1n1", 2_000 * GB, false, Transport::Nvme),
            ],
            mounts.path(),
        );
        let fast = inventory.candidates(DeviceKind::Fast);
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].name, "nvme1n1");
    }

    #[test]
    fn test_nvme_preferred_over_sata_ssd() {
        let mounts = mounts_file("");
        let inventory = Inventory::new(
            vec![
                dev("sdc", 4_000 * GB, false, Transport::Sata), // big SATA SSD
                dev("nvme0n1", 1_000 * GB, false, Transport::Nvme),
            ],
            mounts.path(),
        );
        let best = inventory.require(DeviceKind::Fast).unwrap();
        assert_eq!(best.name, "nvme0n1");
    }

    #[test]
    fn test_rotational_candidates() {
        let mounts = mounts_file("/dev/sda1 / ext4 rw 0 0\n");
        let inventory = Inventory::new(
            vec![
                dev("sda", 1_000 * GB, true, Transport::Sata), // boot disk
                dev("sdb", 8_000 * GB, true, Transport::Sata),
                dev("sdc", 8_000 * GB, true, Transport::Sata),
                dev("nvme0n1", 2_000 * GB, false, Transport::Nvme),
            ],
            mounts.path(),
        );
        let spinning = inventory.candidates(DeviceKind::Rotational);
        let names: Vec<_> = spinning.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sdb", "sdc"]);
    }

    #[test]
    fn test_no_fast_device_is_typed_error() {
        let mounts = mounts_file("");
        let inventory = Inventory::new(
            vec![dev("sdb", 8_000 * GB, true, Transport::Sata)],
            mounts.path(),
        );
        assert_matches!(
            inventory.require(DeviceKind::Fast),
            Err(Error::NoDeviceFound { .. })
        );
    }

    #[test]
    fn test_by_path_lookup() {
        let mounts = mounts_file("");
        let inventory = Inventory::new(
            vec![dev("sdb", 8_000 * GB, true, Transport::Sata)],
            mounts.path(),
        );
        assert!(inventory.by_path("/dev/sdb").is_ok());
        assert_matches!(
            inventory.by_path("/dev/sdz"),
            Err(Error::DeviceNotFound { .. })
        );
    }
}
