//! Backup store
//!
//! Change logs, backup snapshots and their storage budget for one user.

pub mod errors;
pub mod export;
pub mod persist;
pub mod store;
pub mod types;

pub use errors::BackupError;
pub use export::ExportFile;
pub use persist::FileKeyValueStore;
pub use store::{BackupStore, ChangeRecorder, StoreLimits, DEFAULT_EXPORT_DAYS};
pub use types::{Backup, ChangeLogEntry, NewChangeLog, StorageStats, SweepReport};

#[cfg(test)]
pub use persist::MemoryKeyValueStore;
#[cfg(test)]
pub use types::ActionKind;
