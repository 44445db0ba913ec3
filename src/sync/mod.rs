//! Reconnect replay and retention scheduling

pub mod connectivity;
pub mod coordinator;

pub use connectivity::{run_probe, Connectivity};
pub use coordinator::{CoordinatorState, SyncCoordinator};
