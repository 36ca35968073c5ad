//! Caching tier planning
//!
//! Splits the fast device between the OS partition and the cache partition.
//! No fast device means caching is disabled system-wide, which is not an
//! error; callers simply skip the cache tier.

use crate::error::{Error, Result};
use crate::inventory::BlockDevice;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Partition split for the fast device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTierPlan {
    pub os_partition_bytes: u64,
    pub cache_partition_bytes: u64,
    /// The cache partition is below the useful floor: valid, but flagged
    pub undersized: bool,
}

/// Compute the OS/cache split on `fast_device`.
///
/// Hard failure only when the OS reservation consumes the whole device.
/// A remainder below `min_cache_bytes` is technically valid and succeeds
/// with a warning, marked `undersized`.
pub fn plan(
    fast_device: &BlockDevice,
    os_reserve_bytes: u64,
    min_cache_bytes: u64,
) -> Result<CacheTierPlan> {
    if os_reserve_bytes >= fast_device.size_bytes {
        return Err(Error::InsufficientSpace {
            device: fast_device.path.clone(),
            reserve_bytes: os_reserve_bytes,
            size_bytes: fast_device.size_bytes,
        });
    }

    let cache_bytes = fast_device.size_bytes - os_reserve_bytes;
    let undersized = cache_bytes < min_cache_bytes;
    if undersized {
        warn!(
            device = %fast_device.path,
            cache_bytes,
            min_cache_bytes,
            "cache partition is below the recommended floor"
        );
    }

    Ok(CacheTierPlan {
        os_partition_bytes: os_reserve_bytes,
        cache_partition_bytes: cache_bytes,
        undersized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Transport;
    use assert_matches::assert_matches;

    const GB: u64 = 1_000_000_000;

    fn fast(size: u64) -> BlockDevice {
        BlockDevice {
            path: "/dev/nvme0n1".into(),
            name: "nvme0n1".into(),
            size_bytes: size,
            rotational: false,
            removable: false,
            transport: Transport::Nvme,
        }
    }

    #[test]
    fn test_plan_splits_device() {
        let plan = plan(&fast(2_000 * GB), 100 * GB, 10 * GB).unwrap();
        assert_eq!(plan.os_partition_bytes, 100 * GB);
        assert_eq!(plan.cache_partition_bytes, 1_900 * GB);
        assert!(!plan.undersized);
    }

    #[test]
    fn test_reserve_consuming_device_fails() {
        assert_matches!(
            plan(&fast(100 * GB), 100 * GB, 10 * GB),
            Err(Error::InsufficientSpace { .. })
        );
        assert_matches!(
            plan(&fast(100 * GB), 200 * GB, 10 * GB),
            Err(Error::InsufficientSpace { .. })
        );
    }

    #[test]
    fn test_tiny_remainder_is_undersized_not_fatal() {
        let plan = plan(&fast(104 * GB), 100 * GB, 10 * GB).unwrap();
        assert_eq!(plan.cache_partition_bytes, 4 * GB);
        assert!(plan.undersized);
    }
}
