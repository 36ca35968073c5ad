//! Configuration
//!
//! One key=value configuration file, parsed once at process start into an
//! immutable [`ProvisionConfig`] that is passed into each component. No
//! component reads ambient environment state past this boundary.

use crate::capacity::{
    DEFAULT_MINIMUM_CACHE_BYTES, DEFAULT_SAFETY_MARGIN_PERCENT, DEFAULT_SNAPSHOT_OVERHEAD_RATIO,
};
use crate::error::{Error, Result};
use crate::pool::CacheMode;
use crate::topology::RedundancyLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a human byte size: "400G", "1.5T", "10GiB", plain digits.
///
/// Decimal suffixes (K/M/G/T) are powers of 1000; binary suffixes
/// (Ki/Mi/Gi/Ti) are powers of 1024. A trailing "B" is accepted.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty size".into()));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number in '{input}'")))?;
    if value < 0.0 {
        return Err(Error::CapacityParse(format!("negative size '{input}'")));
    }

    let scale: u64 = match suffix.trim().trim_end_matches(['b', 'B']) {
        "" => 1,
        "K" | "k" => 1_000,
        "M" | "m" => 1_000_000,
        "G" | "g" => 1_000_000_000,
        "T" | "t" => 1_000_000_000_000,
        "Ki" | "ki" => 1 << 10,
        "Mi" | "mi" => 1 << 20,
        "Gi" | "gi" => 1 << 30,
        "Ti" | "ti" => 1 << 40,
        other => {
            return Err(Error::CapacityParse(format!(
                "unknown size suffix '{other}' in '{input}'"
            )))
        }
    };

    Ok((value * scale as f64).round() as u64)
}

// =============================================================================
// Provisioner Configuration
// =============================================================================

/// Immutable provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    // --- devices ---
    /// Explicit fast device path; None = autodetect (NVMe preferred)
    pub fast_device: Option<String>,
    /// Explicit rotational pool members; empty = autodetect
    pub data_devices: Vec<String>,

    // --- pool ---
    pub redundancy: RedundancyLevel,
    /// Space kept on the fast device for the OS partition
    pub os_reserve_bytes: u64,
    /// btrfs compression mount option value (e.g. "zstd:3")
    pub compression: String,
    pub cache_mode: CacheMode,
    pub pool_mountpoint: PathBuf,
    pub pool_label: String,

    // --- capacity policy ---
    pub users: Vec<String>,
    pub per_user_quota_bytes: u64,
    pub snapshot_overhead_ratio: f64,
    pub safety_margin_percent: u8,
    pub minimum_cache_bytes: u64,
    pub snapshot_keep_daily: u32,
    pub snapshot_keep_weekly: u32,

    // --- cloud mount ---
    /// rclone remote (e.g. "crypt-share:lab")
    pub remote_name: String,
    pub cloud_mountpoint: PathBuf,
    pub cloud_cache_dir: PathBuf,
    pub cache_max_age_days: u32,
    pub health_interval_secs: u64,
    /// Opaque tuning passed through to the remote store
    pub bandwidth_limit: Option<String>,
    pub chunk_size: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            fast_device: None,
            data_devices: Vec::new(),
            redundancy: RedundancyLevel::Raid1,
            os_reserve_bytes: 100_000_000_000,
            compression: "zstd:3".into(),
            cache_mode: CacheMode::WriteBack,
            pool_mountpoint: PathBuf::from("/srv/pool"),
            pool_label: "pool".into(),
            users: Vec::new(),
            per_user_quota_bytes: 1_000_000_000_000,
            snapshot_overhead_ratio: DEFAULT_SNAPSHOT_OVERHEAD_RATIO,
            safety_margin_percent: DEFAULT_SAFETY_MARGIN_PERCENT,
            minimum_cache_bytes: DEFAULT_MINIMUM_CACHE_BYTES,
            snapshot_keep_daily: 7,
            snapshot_keep_weekly: 4,
            remote_name: String::new(),
            cloud_mountpoint: PathBuf::from("/srv/share"),
            cloud_cache_dir: PathBuf::from("/srv/pool/shared-cache"),
            cache_max_age_days: 30,
            health_interval_secs: 300,
            bandwidth_limit: None,
            chunk_size: None,
        }
    }
}

impl ProvisionConfig {
    /// Load and parse the key=value configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Parse key=value text. Unknown keys are typed errors, not warnings.
    pub fn parse(contents: &str, file: &str) -> Result<Self> {
        let mut config = Self::default();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Configuration(format!("{file}:{}: expected key=value", idx + 1))
            })?;
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "fast_device" => {
                    config.fast_device = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    }
                }
                "data_devices" => config.data_devices = parse_list(value),
                "redundancy" => config.redundancy = value.parse()?,
                "os_reserve" => config.os_reserve_bytes = parse_size(value)?,
                "compression" => config.compression = value.to_string(),
                "cache_mode" => config.cache_mode = value.parse()?,
                "pool_mountpoint" => config.pool_mountpoint = PathBuf::from(value),
                "pool_label" => config.pool_label = value.to_string(),
                "users" => config.users = parse_list(value),
                "per_user_quota" => config.per_user_quota_bytes = parse_size(value)?,
                "snapshot_overhead_ratio" => {
                    config.snapshot_overhead_ratio = value.parse().map_err(|_| {
                        Error::Configuration(format!("invalid ratio '{value}'"))
                    })?
                }
                "safety_margin_percent" => {
                    config.safety_margin_percent = value.parse().map_err(|_| {
                        Error::Configuration(format!("invalid percent '{value}'"))
                    })?
                }
                "minimum_cache" => config.minimum_cache_bytes = parse_size(value)?,
                "snapshot_keep_daily" => {
                    config.snapshot_keep_daily = parse_u32(file, idx, value)?
                }
                "snapshot_keep_weekly" => {
                    config.snapshot_keep_weekly = parse_u32(file, idx, value)?
                }
                "remote" => config.remote_name = value.to_string(),
                "cloud_mountpoint" => config.cloud_mountpoint = PathBuf::from(value),
                "cloud_cache_dir" => config.cloud_cache_dir = PathBuf::from(value),
                "cache_max_age_days" => {
                    config.cache_max_age_days = parse_u32(file, idx, value)?
                }
                "health_interval_secs" => {
                    config.health_interval_secs = value.parse().map_err(|_| {
                        Error::Configuration(format!("invalid interval '{value}'"))
                    })?
                }
                "bandwidth_limit" => config.bandwidth_limit = non_empty(value),
                "chunk_size" => config.chunk_size = non_empty(value),
                _ => {
                    return Err(Error::UnknownConfigKey {
                        file: file.to_string(),
                        line: idx + 1,
                        key: key.to_string(),
                    })
                }
            }
        }

        Ok(config)
    }

    /// Number of provisioned users
    pub fn user_count(&self) -> u64 {
        self.users.len() as u64
    }

    /// Internal-consistency checks; reads nothing and mutates nothing.
    pub fn validate(&self) -> Result<()> {
        if self.safety_margin_percent >= 100 {
            return Err(Error::Configuration(
                "safety_margin_percent must be below 100".into(),
            ));
        }
        if !(0.0..=10.0).contains(&self.snapshot_overhead_ratio) {
            return Err(Error::Configuration(
                "snapshot_overhead_ratio must be between 0 and 10".into(),
            ));
        }
        if !self.data_devices.is_empty() {
            crate::topology::validate(self.redundancy, self.data_devices.len())?;
        }
        if self.health_interval_secs == 0 {
            return Err(Error::Configuration(
                "health_interval_secs must be positive".into(),
            ));
        }
        if self.os_reserve_bytes == 0 {
            return Err(Error::Configuration("os_reserve must be positive".into()));
        }
        Ok(())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_u32(file: &str, idx: usize, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::Configuration(format!("{file}:{}: invalid count '{value}'", idx + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("400G").unwrap(), 400_000_000_000);
        assert_eq!(parse_size("1.5T").unwrap(), 1_500_000_000_000);
        assert_eq!(parse_size("10GB").unwrap(), 10_000_000_000);
        assert_eq!(parse_size("4Gi").unwrap(), 4 * (1 << 30));
        assert_eq!(parse_size("1GiB").unwrap(), 1 << 30);
        assert_matches!(parse_size("10X"), Err(Error::CapacityParse(_)));
        assert_matches!(parse_size(""), Err(Error::CapacityParse(_)));
    }

    #[test]
    fn test_parse_full_config() {
        let text = r#"
# workstation storage policy
fast_device = /dev/nvme0n1
data_devices = /dev/sda, /dev/sdb
redundancy = raid1
os_reserve = 100G
compression = zstd:3
cache_mode = writeback
users = ada, grace, edsger
per_user_quota = 1T
safety_margin_percent = 20
minimum_cache = 10G
remote = crypt-share:lab
cache_max_age_days = 14
bandwidth_limit = 40M
"#;
        let config = ProvisionConfig::parse(text, "test.conf").unwrap();
        assert_eq!(config.fast_device.as_deref(), Some("/dev/nvme0n1"));
        assert_eq!(config.data_devices.len(), 2);
        assert_eq!(config.redundancy, RedundancyLevel::Raid1);
        assert_eq!(config.os_reserve_bytes, 100_000_000_000);
        assert_eq!(config.user_count(), 3);
        assert_eq!(config.per_user_quota_bytes, 1_000_000_000_000);
        assert_eq!(config.cache_mode, CacheMode::WriteBack);
        assert_eq!(config.bandwidth_limit.as_deref(), Some("40M"));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_is_typed_error() {
        let err = ProvisionConfig::parse("raid=raid1\n", "c.conf").unwrap_err();
        assert_matches!(err, Error::UnknownConfigKey { line: 1, .. });
    }

    #[test]
    fn test_unknown_raid_level_rejected() {
        let err = ProvisionConfig::parse("redundancy = raid6\n", "c.conf").unwrap_err();
        assert_matches!(err, Error::UnknownRedundancyLevel(_));
    }

    #[test]
    fn test_empty_fast_device_means_autodetect() {
        let config = ProvisionConfig::parse("fast_device =\n", "c.conf").unwrap();
        assert!(config.fast_device.is_none());
    }

    #[test]
    fn test_validate_topology_against_device_count() {
        let text = "data_devices = /dev/sda, /dev/sdb\nredundancy = raid10\n";
        let config = ProvisionConfig::parse(text, "c.conf").unwrap();
        assert_matches!(config.validate(), Err(Error::InvalidTopology { .. }));
    }

    #[test]
    fn test_validate_rejects_full_margin() {
        let config = ProvisionConfig {
            safety_margin_percent: 100,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }
}
