//! Change-log and backup records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of user-visible action recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Scan,
    AutoFix,
    RepositoryAccess,
    PermissionChange,
    Backup,
}

/// Immutable audit record of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<serde_json::Value>,
}

/// A change-log entry before the store assigns its id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChangeLog {
    pub action: ActionKind,
    #[serde(default)]
    pub repository: Option<String>,
    pub details: String,
    #[serde(default)]
    pub before_state: Option<serde_json::Value>,
    #[serde(default)]
    pub after_state: Option<serde_json::Value>,
}

impl NewChangeLog {
    pub fn new(action: ActionKind, details: impl Into<String>) -> Self {
        Self {
            action,
            repository: None,
            details: details.into(),
            before_state: None,
            after_state: None,
        }
    }

    #[cfg(test)]
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn after_state(mut self, state: serde_json::Value) -> Self {
        self.after_state = Some(state);
        self
    }
}

/// Summary record of a stored backup blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub repositories: Vec<String>,
    /// Byte length of the serialized blob
    pub size: u64,
    pub compressed: bool,
}

/// Content of a backup blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    pub repositories: Vec<String>,
    pub change_logs: Vec<ChangeLogEntry>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Persisted per-user record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCollections {
    #[serde(default)]
    pub change_logs: Vec<ChangeLogEntry>,
    #[serde(default)]
    pub backups: Vec<Backup>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Change-log export document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogExport {
    pub logs: Vec<ChangeLogEntry>,
    pub exported: DateTime<Utc>,
    pub period: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// Fraction of the quota at which callers should start reacting
pub const NEAR_QUOTA_RATIO: f64 = 0.8;

/// Storage usage, derived from the live collections
///
/// `used` covers the collections record alone. Backup blobs share the same
/// quota, so `stored`, `available` and the thresholds count both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Serialized size of the change-log and backup collections
    pub used: u64,
    /// Sum of backup blob sizes
    pub blob_bytes: u64,
    /// `used + blob_bytes`: what the quota is enforced against
    pub stored: u64,
    /// Quota minus stored, floored at zero
    pub available: u64,
    pub quota: u64,
    pub logs: usize,
    pub backups: usize,
}

impl StorageStats {
    pub fn new(used: u64, blob_bytes: u64, quota: u64, logs: usize, backups: usize) -> Self {
        let stored = used + blob_bytes;
        Self {
            used,
            blob_bytes,
            stored,
            available: quota.saturating_sub(stored),
            quota,
            logs,
            backups,
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.quota == 0 {
            return 1.0;
        }
        self.stored as f64 / self.quota as f64
    }

    pub fn is_near_quota(&self) -> bool {
        self.usage_ratio() >= NEAR_QUOTA_RATIO
    }

    pub fn is_over_quota(&self) -> bool {
        self.stored > self.quota
    }

    /// Whether `bytes` more would still fit in the quota
    pub fn fits(&self, bytes: u64) -> bool {
        self.stored + bytes <= self.quota
    }
}

/// What a retention sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub removed_logs: usize,
    pub removed_backups: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed_logs == 0 && self.removed_backups == 0
    }
}
