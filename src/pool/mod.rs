//! Pool provisioning
//!
//! The caching-tier planner, the bcache tier, and the pool builder that
//! turns raw devices into a mounted, registered btrfs pool.

mod builder;
mod cache;
mod planner;

pub use builder::{estimated_capacity, BuildOutcome, FastTarget, PoolBuilder};
pub use cache::{AttachState, CacheMode, CacheTier};
pub use planner::{plan, CacheTierPlan};
