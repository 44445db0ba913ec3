//! Backup Store Error Types

/// Key-value persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(test)]
    #[error("Storage quota exceeded: need {needed} bytes, capacity {capacity}")]
    QuotaExceeded { needed: usize, capacity: usize },
}

/// Errors surfaced by backup operations that risk data loss
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Failed to create backup: {reason}")]
    Creation { reason: String },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup storage error: {0}")]
    Persistence(#[from] PersistError),
}

impl BackupError {
    pub fn creation(reason: impl std::fmt::Display) -> Self {
        BackupError::Creation {
            reason: reason.to_string(),
        }
    }
}
