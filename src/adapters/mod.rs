//! CLI-backed adapters for the collaborator ports

mod docker;
mod rclone;

pub use docker::DockerRuntime;
pub use rclone::RcloneStore;
