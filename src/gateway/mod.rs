//! Cache gateway
//!
//! Intercepts outbound requests and serves them network-first (backup class)
//! or cache-first (everything else) from persistent partitions on disk.

pub mod index;
pub mod policy;
pub mod storage;
pub mod worker;

pub use storage::PartitionStore;
pub use worker::{
    CacheGateway, GatewayConfig, GatewayEvent, GatewayOutcome, Lifecycle, MaintenanceMessage,
};
