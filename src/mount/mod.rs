//! Cloud-backed mount supervision

mod supervisor;

pub use supervisor::{CheckOutcome, MountState, MountSupervisor, SupervisorConfig};
