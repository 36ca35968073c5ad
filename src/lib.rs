//! poolsmith - single-host storage provisioner
//!
//! Turns the raw disks of an ML workstation into a redundant btrfs pool
//! fronted by a bcache tier, plans capacity against a per-user quota policy,
//! and supervises a cloud-backed mount whose write cache is bounded by the
//! capacity plan.
//!
//! # Architecture
//!
//! ```text
//! DeviceInventory -> TopologyValidator -> CachingTierPlanner / PoolBuilder
//!                                                   |
//!                                            (pool exists)
//!                                                   |
//!                                          CapacityAllocator
//!                                                   |
//!                                          MountSupervisor -> AlertSink
//! ```
//!
//! Data flows one direction; the allocator is pure and recomputed whenever
//! the policy inputs change. The only long-running component is the mount
//! supervisor.
//!
//! # Modules
//!
//! - [`inventory`]: block device enumeration and role classification
//! - [`topology`]: redundancy levels and pool topology validation
//! - [`capacity`]: the capacity-allocation arithmetic core
//! - [`pool`]: caching-tier planner, bcache tier, pool builder
//! - [`mount`]: cloud mount supervisor
//! - [`ports`]: collaborator traits (alerting, containers, remote store)
//! - [`adapters`]: docker and rclone implementations of the ports
//! - [`config`]: key=value configuration boundary
//! - [`error`]: error types and remediation

pub mod adapters;
pub mod capacity;
pub mod config;
pub mod error;
pub mod exec;
pub mod inventory;
pub mod mount;
pub mod pool;
pub mod ports;
pub mod quiesce;
pub mod retry;
pub mod topology;

// Re-export commonly used types
pub use capacity::{allocate, CapacityPlan, CapacityRequest};
pub use config::ProvisionConfig;
pub use error::{Error, Result};
pub use inventory::{BlockDevice, DeviceKind, DeviceScanner, Inventory, ScannerConfig};
pub use mount::{MountState, MountSupervisor, SupervisorConfig};
pub use pool::{BuildOutcome, CacheMode, CacheTier, CacheTierPlan, FastTarget, PoolBuilder};
pub use ports::{AlertLevel, AlertSink, ContainerRuntime, RemoteStore};
pub use topology::RedundancyLevel;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
