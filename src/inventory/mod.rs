//! Device inventory
//!
//! Read-only enumeration and classification of block devices. Produces
//! immutable [`BlockDevice`] snapshots; never mutates OS state.

mod classify;
mod scanner;

pub use classify::{parent_disk, DeviceKind, Inventory};
pub use scanner::{BlockDevice, DeviceScanner, ScanReport, ScannerConfig, Transport};
