//! Error types for the provisioner
//!
//! Provides structured error types for all provisioning stages including
//! device inventory, topology validation, capacity planning, pool building,
//! and the cloud mount supervisor.

use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown configuration key '{key}' at {file}:{line}")]
    UnknownConfigKey {
        file: String,
        line: usize,
        key: String,
    },

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Unknown redundancy level: '{0}' (expected single, raid0, raid1 or raid10)")]
    UnknownRedundancyLevel(String),

    #[error("Unknown cache mode: '{0}' (expected writeback, writethrough, writearound or none)")]
    UnknownCacheMode(String),

    // =========================================================================
    // Device Inventory Errors
    // =========================================================================
    #[error("No {kind} device found: auto-detection matched nothing and no device is configured")]
    NoDeviceFound { kind: String },

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Device scan failed: {0}")]
    DeviceScan(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("Invalid topology: {level} requires at least {minimum_required} devices, got {device_count}")]
    InvalidTopology {
        level: String,
        device_count: usize,
        minimum_required: usize,
    },

    // =========================================================================
    // Cache Tier Errors
    // =========================================================================
    #[error("Insufficient space on {device}: OS reservation of {reserve_bytes} bytes leaves no cache partition ({size_bytes} bytes total)")]
    InsufficientSpace {
        device: String,
        reserve_bytes: u64,
        size_bytes: u64,
    },

    #[error("Partition {device} did not appear within {waited_secs}s after carving")]
    PartitionTimeout { device: String, waited_secs: u64 },

    #[error("Cache set {cset} did not register within {waited_secs}s")]
    CacheInitTimeout { cset: String, waited_secs: u64 },

    #[error("Backing device {device} did not appear within {waited_secs}s")]
    BackingDeviceTimeout { device: String, waited_secs: u64 },

    #[error("Device {device} is already attached to a different cache set {cset}")]
    CacheAttachConflict { device: String, cset: String },

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("Insufficient capacity: reserved {reserved} bytes exceeds safe limit {safe_limit} bytes (shortfall {shortfall} bytes)")]
    InsufficientCapacity {
        reserved: u64,
        safe_limit: u64,
        shortfall: u64,
    },

    #[error("Cache budget too small: {cache_budget} bytes is below the {minimum} byte floor")]
    CacheTooSmall { cache_budget: u64, minimum: u64 },

    // =========================================================================
    // Pool Build Errors
    // =========================================================================
    #[error("Operator declined destructive confirmation")]
    ConfirmationDeclined,

    #[error("Command failed: {program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("Mount verification failed: {mountpoint} not present in mount table after mount")]
    MountVerification { mountpoint: String },

    #[error("Could not determine filesystem UUID for {device}")]
    UuidNotFound { device: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Concrete remediation advice for the operator, where one exists.
    ///
    /// Every planning failure names the knob to turn; build failures name
    /// what to inspect. Returns `None` for errors that are self-describing.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::NoDeviceFound { kind } => Some(format!(
                "set an explicit {} device path in the configuration file",
                kind
            )),
            Error::InvalidTopology {
                level,
                minimum_required,
                ..
            } => Some(format!(
                "add devices to reach {} for {}, or choose a weaker redundancy level explicitly",
                minimum_required, level
            )),
            Error::InsufficientSpace { device, .. } => Some(format!(
                "reduce the OS reservation or use a larger device than {}",
                device
            )),
            Error::InsufficientCapacity { shortfall, .. } => Some(format!(
                "reduce user count or per-user quota, lower the safety margin, or add {} bytes of capacity",
                shortfall
            )),
            Error::CacheTooSmall { .. } => Some(
                "reduce user count or per-user quota, or lower the minimum cache floor".into(),
            ),
            Error::CacheAttachConflict { device, .. } => Some(format!(
                "detach {} from its current cache set manually before re-running",
                device
            )),
            Error::PartitionTimeout { .. }
            | Error::CacheInitTimeout { .. }
            | Error::BackingDeviceTimeout { .. } => Some(
                "inspect dmesg and /sys/fs/bcache; the pool may be partially built and requires manual investigation".into(),
            ),
            Error::ConfirmationDeclined => {
                Some("re-run and answer 'yes', or pass --yes for non-interactive use".into())
            }
            _ => None,
        }
    }

    /// Whether this failure occurred in (or blocks) a destructive stage.
    ///
    /// Validation and planning failures leave the system untouched; build
    /// failures may leave partial state behind.
    pub fn is_destructive_stage(&self) -> bool {
        matches!(
            self,
            Error::PartitionTimeout { .. }
                | Error::CacheInitTimeout { .. }
                | Error::BackingDeviceTimeout { .. }
                | Error::CacheAttachConflict { .. }
                | Error::CommandFailed { .. }
                | Error::MountVerification { .. }
                | Error::UuidNotFound { .. }
        )
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
