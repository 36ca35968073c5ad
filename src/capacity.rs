//! Capacity allocation
//!
//! The arithmetic core: given the pool size and the quota policy, compute
//! how much space user data plus snapshots will reserve, check it fits under
//! the safety margin, and derive the cache budget for the cloud-backed mount.
//!
//! Pure and side-effect-free by design: it is recomputed every time the
//! cloud mount is (re)configured, e.g. whenever the user count changes.
//!
//! Numeric semantics: all values are integer bytes. Percentage math uses
//! integer arithmetic (widened to u128) and rounds down; the snapshot
//! overhead ratio is carried in thousandths so its product also stays in
//! integer math, rounded *up*, exact at any scale. Reserved space therefore
//! never under-counts and the cache budget never over-promises.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default snapshot overhead: snapshots cost an extra 0.5x of live user data
pub const DEFAULT_SNAPSHOT_OVERHEAD_RATIO: f64 = 0.5;

/// Default safety margin: keep 20% of total capacity unallocated
pub const DEFAULT_SAFETY_MARGIN_PERCENT: u8 = 20;

/// Default floor below which a cloud-mount cache is not worth running (10 GB)
pub const DEFAULT_MINIMUM_CACHE_BYTES: u64 = 10_000_000_000;

/// Inputs to capacity planning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRequest {
    /// Usable pool capacity in bytes
    pub total_bytes: u64,
    /// Number of provisioned users
    pub user_count: u64,
    /// Quota per user in bytes
    pub per_user_quota_bytes: u64,
    /// Extra space snapshots consume, as a multiple of live user data
    pub snapshot_overhead_ratio: f64,
    /// Percent of total capacity deliberately left unallocated
    pub safety_margin_percent: u8,
    /// Minimum acceptable cache budget
    pub minimum_cache_bytes: u64,
}

impl CapacityRequest {
    pub fn new(total_bytes: u64, user_count: u64, per_user_quota_bytes: u64) -> Self {
        Self {
            total_bytes,
            user_count,
            per_user_quota_bytes,
            snapshot_overhead_ratio: DEFAULT_SNAPSHOT_OVERHEAD_RATIO,
            safety_margin_percent: DEFAULT_SAFETY_MARGIN_PERCENT,
            minimum_cache_bytes: DEFAULT_MINIMUM_CACHE_BYTES,
        }
    }
}

/// Result of capacity planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlan {
    pub total_bytes: u64,
    /// User data plus snapshot overhead, rounded up
    pub reserved_bytes: u64,
    /// Capacity the reservation must stay under
    pub safe_limit_bytes: u64,
    /// Capacity remaining after the reservation
    pub free_bytes: u64,
    /// Cache budget for the cloud-backed mount, rounded down
    pub cache_budget_bytes: u64,
}

/// Percent-of applied with integer arithmetic, rounding down
fn apply_margin(bytes: u64, margin_percent: u8) -> u64 {
    let keep = 100u128 - u128::from(margin_percent.min(100));
    (u128::from(bytes) * keep / 100) as u64
}

/// Compute a [`CapacityPlan`] or fail with the numeric shortfall.
///
/// Algorithm (spec'd policy):
///   reserved   = users * quota, plus snapshot overhead (rounded up)
///   safe limit = total * (1 - margin)        (rounded down)
///   fail InsufficientCapacity when reserved > safe limit
///   cache      = (total - reserved) * (1 - margin)  (rounded down)
///   fail CacheTooSmall when cache < floor
pub fn allocate(request: &CapacityRequest) -> Result<CapacityPlan> {
    if request.safety_margin_percent >= 100 {
        return Err(Error::Configuration(format!(
            "safety margin must be below 100 percent, got {}",
            request.safety_margin_percent
        )));
    }
    if !(0.0..=10.0).contains(&request.snapshot_overhead_ratio) {
        return Err(Error::Configuration(format!(
            "snapshot overhead ratio out of range: {}",
            request.snapshot_overhead_ratio
        )));
    }

    let user_data = request
        .user_count
        .checked_mul(request.per_user_quota_bytes)
        .ok_or_else(|| Error::Configuration("user quota product overflows u64".into()))?;

    // Snapshot overhead rounds up so reserved space is never under-counted.
    // The ratio is carried as thousandths: config ratios have at most three
    // decimal places, and u128 keeps the product exact beyond f64 precision.
    let ratio_mils = (request.snapshot_overhead_ratio * 1_000.0).round() as u128;
    let overhead = (u128::from(user_data) * ratio_mils + 999) / 1_000;
    let reserved = u64::try_from(u128::from(user_data) + overhead)
        .map_err(|_| Error::Configuration("reserved bytes overflow u64".into()))?;

    let safe_limit = apply_margin(request.total_bytes, request.safety_margin_percent);
    if reserved > safe_limit {
        return Err(Error::InsufficientCapacity {
            reserved,
            safe_limit,
            shortfall: reserved - safe_limit,
        });
    }

    let free = request.total_bytes - reserved;
    let cache_budget = apply_margin(free, request.safety_margin_percent);
    if cache_budget < request.minimum_cache_bytes {
        return Err(Error::CacheTooSmall {
            cache_budget,
            minimum: request.minimum_cache_bytes,
        });
    }

    Ok(CapacityPlan {
        total_bytes: request.total_bytes,
        reserved_bytes: reserved,
        safe_limit_bytes: safe_limit,
        free_bytes: free,
        cache_budget_bytes: cache_budget,
    })
}

/// Human-readable byte count for log lines and reports
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1_000_000_000_000, "TB"),
        (1_000_000_000, "GB"),
        (1_000_000, "MB"),
        (1_000, "KB"),
    ];
    for (scale, unit) in UNITS {
        if bytes >= scale {
            return format!("{:.1}{}", bytes as f64 / scale as f64, unit);
        }
    }
    format!("{}B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GB: u64 = 1_000_000_000;

    fn request(total_gb: u64, users: u64, quota_gb: u64) -> CapacityRequest {
        CapacityRequest::new(total_gb * GB, users, quota_gb * GB)
    }

    #[test]
    fn test_worked_example_succeeds() {
        // 10TB pool, 5 users at 1TB, 0.5 snapshot overhead, 20% margin
        let plan = allocate(&request(10_000, 5, 1_000)).unwrap();
        assert_eq!(plan.reserved_bytes, 7_500 * GB);
        assert_eq!(plan.safe_limit_bytes, 8_000 * GB);
        assert_eq!(plan.free_bytes, 2_500 * GB);
        assert_eq!(plan.cache_budget_bytes, 2_000 * GB);
    }

    #[test]
    fn test_worked_example_fails_at_seven_users() {
        let err = allocate(&request(10_000, 7, 1_000)).unwrap_err();
        assert_matches!(
            err,
            Error::InsufficientCapacity {
                reserved,
                safe_limit,
                shortfall,
            } if reserved == 10_500 * GB
                && safe_limit == 8_000 * GB
                && shortfall == 2_500 * GB
        );
    }

    #[test]
    fn test_reserved_is_exact_for_default_ratio() {
        // users*quota*1.5 fits: reserved must be exactly that product
        for users in 1..=6 {
            let req = request(10_000, users, 1_000);
            if let Ok(plan) = allocate(&req) {
                assert_eq!(plan.reserved_bytes, users * 1_000 * GB * 3 / 2);
            }
        }
    }

    #[test]
    fn test_allocate_is_pure() {
        let req = request(10_000, 5, 1_000);
        assert_eq!(allocate(&req).unwrap(), allocate(&req).unwrap());
    }

    #[test]
    fn test_cache_budget_monotone_in_user_count() {
        let mut last_budget = u64::MAX;
        let mut failed = false;
        for users in 0..12 {
            match allocate(&request(10_000, users, 1_000)) {
                Ok(plan) => {
                    assert!(!failed, "success after failure at users={users}");
                    assert!(plan.cache_budget_bytes <= last_budget);
                    last_budget = plan.cache_budget_bytes;
                }
                Err(_) => failed = true,
            }
        }
        assert!(failed, "expected failure for large user counts");
    }

    #[test]
    fn test_minimum_cache_boundary() {
        // margin 0 makes cache budget == free, so the boundary is exact
        let mut req = request(1_000, 1, 600);
        req.snapshot_overhead_ratio = 0.5;
        req.safety_margin_percent = 0;
        // reserved = 900GB, free = 100GB
        req.minimum_cache_bytes = 100 * GB;
        assert!(allocate(&req).is_ok());

        req.minimum_cache_bytes = 100 * GB + 1;
        assert_matches!(
            allocate(&req),
            Err(Error::CacheTooSmall {
                cache_budget,
                minimum,
            }) if cache_budget == 100 * GB && minimum == 100 * GB + 1
        );
    }

    #[test]
    fn test_zero_users_reserves_nothing() {
        let plan = allocate(&request(10_000, 0, 1_000)).unwrap();
        assert_eq!(plan.reserved_bytes, 0);
        assert_eq!(plan.free_bytes, 10_000 * GB);
    }

    #[test]
    fn test_margin_must_stay_below_hundred() {
        let mut req = request(10_000, 1, 100);
        req.safety_margin_percent = 100;
        assert_matches!(allocate(&req), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_overhead_rounds_up() {
        let mut req = CapacityRequest::new(1_000 * GB, 1, 3);
        req.snapshot_overhead_ratio = 0.5;
        req.safety_margin_percent = 0;
        req.minimum_cache_bytes = 0;
        // 3 * 0.5 = 1.5 rounds up to 2
        let plan = allocate(&req).unwrap();
        assert_eq!(plan.reserved_bytes, 5);
    }

    #[test]
    fn test_reserved_exact_beyond_f64_precision() {
        // Above 2^53 bytes an f64 cast would drop the low bits of user data
        // before the multiply; the reservation must stay byte-exact anyway.
        let quota = (1u64 << 60) + 1;
        let mut req = CapacityRequest::new(u64::MAX, 1, quota);
        req.safety_margin_percent = 0;
        req.minimum_cache_bytes = 0;
        let plan = allocate(&req).unwrap();
        assert_eq!(plan.reserved_bytes, quota + (quota + 1) / 2);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(2_000 * GB), "2.0TB");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1_500_000), "1.5MB");
    }
}
