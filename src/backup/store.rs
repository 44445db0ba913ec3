//! Backup Store
//!
//! Owns the change log and backup collections for one user. The collections
//! are persisted as a single record after every change; backup blobs are
//! persisted separately under their own keys. Key-value calls run on the
//! blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::errors::{BackupError, PersistError};
use super::export::ExportFile;
use super::persist::KeyValueStore;
use super::types::{
    ActionKind, Backup, BackupPayload, ChangeLogEntry, ChangeLogExport, NewChangeLog,
    StorageStats, StoredCollections, SweepReport,
};
use crate::clock::{window_start, Clock};

/// User key used when no user is signed in
pub const DEMO_USER: &str = "demo";

/// Days covered by a change-log export when none is given
pub const DEFAULT_EXPORT_DAYS: u32 = 7;

/// Limits applied by the store
#[derive(Debug, Clone)]
pub struct StoreLimits {
    /// Storage budget in bytes, shared by the collections record and blobs
    pub quota_bytes: u64,
    /// Change-log entries kept; older ones are dropped first
    pub max_change_logs: usize,
    /// Most recent change-log entries bundled into each backup
    pub backup_log_slice: usize,
    /// Age after which logs and backups are swept
    pub retention: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            quota_bytes: 50 * 1024 * 1024,
            max_change_logs: 1000,
            backup_log_slice: 100,
            retention: Duration::days(7),
        }
    }
}

/// Borrowed view of the collections, for size accounting
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionsView<'a> {
    change_logs: &'a [ChangeLogEntry],
    backups: &'a [Backup],
}

/// Live collections, newest first
#[derive(Default, Clone)]
struct Collections {
    change_logs: Vec<ChangeLogEntry>,
    backups: Vec<Backup>,
}

impl Collections {
    fn used_bytes(&self) -> u64 {
        serde_json::to_vec(&CollectionsView {
            change_logs: &self.change_logs,
            backups: &self.backups,
        })
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
    }

    fn blob_bytes(&self) -> u64 {
        self.backups.iter().map(|b| b.size).sum()
    }
}

/// Change logs and backups for a single user
pub struct BackupStore {
    user: Option<String>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    limits: StoreLimits,
    state: RwLock<Collections>,
    near_quota: AtomicBool,
}

impl BackupStore {
    /// Open the store for `user` (or the demo user), loading persisted state
    ///
    /// The initial load reads the key-value store directly; call this before
    /// serving, or from the blocking pool. An unreadable record is logged and
    /// the store starts empty.
    pub fn open(
        user: Option<String>,
        kv: Box<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        limits: StoreLimits,
    ) -> Self {
        let mut store = Self {
            user,
            kv: Arc::from(kv),
            clock,
            limits,
            state: RwLock::new(Collections::default()),
            near_quota: AtomicBool::new(false),
        };

        let loaded = store.load();
        info!(
            user = store.user_key(),
            logs = loaded.change_logs.len(),
            backups = loaded.backups.len(),
            "Backup store opened"
        );
        store.near_quota = AtomicBool::new(store.stats_for(&loaded).is_near_quota());
        *store.state.get_mut() = loaded;
        store
    }

    fn load(&self) -> Collections {
        let record = match self.kv.get(&self.data_key()) {
            Ok(Some(record)) => record,
            Ok(None) => return Collections::default(),
            Err(e) => {
                error!(error = %e, "Failed to load stored backup data");
                return Collections::default();
            }
        };

        match serde_json::from_str::<StoredCollections>(&record) {
            Ok(stored) => Collections {
                change_logs: stored.change_logs,
                backups: stored.backups,
            },
            Err(e) => {
                error!(error = %e, "Stored backup data is corrupt, starting empty");
                Collections::default()
            }
        }
    }

    pub fn user_key(&self) -> &str {
        self.user.as_deref().unwrap_or(DEMO_USER)
    }

    fn data_key(&self) -> String {
        format!("backup_data_{}", self.user_key())
    }

    fn blob_key(id: &str) -> String {
        format!("backup_{}", id)
    }

    /// Run a key-value operation on the blocking pool
    async fn with_kv<T, Op>(&self, op: Op) -> Result<T, PersistError>
    where
        T: Send + 'static,
        Op: FnOnce(&dyn KeyValueStore) -> Result<T, PersistError> + Send + 'static,
    {
        let kv = Arc::clone(&self.kv);
        tokio::task::spawn_blocking(move || op(kv.as_ref()))
            .await
            .map_err(|e| PersistError::Io(std::io::Error::other(format!("persistence task failed: {e}"))))?
    }

    /// Persist the collections record
    async fn save(&self, state: &Collections) -> Result<(), PersistError> {
        let record = StoredCollections {
            change_logs: state.change_logs.clone(),
            backups: state.backups.clone(),
            last_updated: Some(self.clock.now()),
        };
        let json = serde_json::to_string(&record).map_err(std::io::Error::from)?;
        let key = self.data_key();
        self.with_kv(move |kv| kv.set(&key, &json)).await?;

        self.check_quota(state);
        Ok(())
    }

    /// Persist the collections record, logging a failure
    async fn save_logged(&self, state: &Collections) {
        if let Err(e) = self.save(state).await {
            error!(error = %e, "Failed to save backup data");
        }
    }

    fn check_quota(&self, state: &Collections) {
        let stats = self.stats_for(state);
        let near = stats.is_near_quota();
        let was_near = self.near_quota.swap(near, Ordering::Relaxed);
        if near && !was_near {
            warn!(
                stored = stats.stored,
                quota = stats.quota,
                "Backup storage above 80% of quota"
            );
        }
    }

    fn stats_for(&self, state: &Collections) -> StorageStats {
        StorageStats::new(
            state.used_bytes(),
            state.blob_bytes(),
            self.limits.quota_bytes,
            state.change_logs.len(),
            state.backups.len(),
        )
    }

    fn push_log(&self, state: &mut Collections, entry: NewChangeLog) -> ChangeLogEntry {
        let entry = ChangeLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            action: entry.action,
            repository: entry.repository,
            details: entry.details,
            before_state: entry.before_state,
            after_state: entry.after_state,
        };

        state.change_logs.insert(0, entry.clone());
        state.change_logs.truncate(self.limits.max_change_logs);
        entry
    }

    /// Record an action; the oldest entries beyond the limit are dropped
    pub async fn add_change_log(&self, entry: NewChangeLog) -> ChangeLogEntry {
        let mut state = self.state.write().await;
        let entry = self.push_log(&mut state, entry);
        self.save_logged(&state).await;

        debug!(id = %entry.id, action = ?entry.action, "Recorded change log");
        entry
    }

    /// Snapshot the given repositories with the most recent change logs
    ///
    /// Returns the new backup id. Nothing is kept unless both the blob and
    /// the updated collections record are persisted.
    pub async fn create_backup(&self, repositories: Vec<String>) -> Result<String, BackupError> {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let payload = BackupPayload {
            repositories: repositories.clone(),
            change_logs: state
                .change_logs
                .iter()
                .take(self.limits.backup_log_slice)
                .cloned()
                .collect(),
            timestamp: now,
            user: self.user.clone(),
        };
        let blob = serde_json::to_string(&payload).map_err(BackupError::creation)?;
        let size = blob.len() as u64;

        let stats = self.stats_for(&state);
        if !stats.fits(size) {
            warn!(
                stored = stats.stored,
                blob = size,
                quota = stats.quota,
                "Backup would exceed storage quota"
            );
            return Err(BackupError::creation(format!(
                "storage quota exceeded ({} of {} bytes); download or clear old backups first",
                stats.stored + size,
                stats.quota
            )));
        }

        let backup = Backup {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            repositories: repositories.clone(),
            size,
            compressed: false,
        };
        let id = backup.id.clone();
        let blob_key = Self::blob_key(&id);

        {
            let key = blob_key.clone();
            self.with_kv(move |kv| kv.set(&key, &blob))
                .await
                .map_err(BackupError::creation)?;
        }

        let previous = state.clone();
        state.backups.insert(0, backup);
        self.push_log(
            &mut state,
            NewChangeLog::new(
                ActionKind::Backup,
                format!("Created backup for {} repositories", repositories.len()),
            )
            .after_state(serde_json::json!({
                "backupId": id,
                "repositories": repositories,
            })),
        );

        if let Err(e) = self.save(&state).await {
            *state = previous;
            if let Err(remove_err) = self.with_kv(move |kv| kv.remove(&blob_key)).await {
                warn!(backup_id = %id, error = %remove_err, "Failed to remove orphaned backup blob");
            }
            error!(backup_id = %id, error = %e, "Failed to save backup record");
            return Err(BackupError::creation(format!("failed to save backup record: {}", e)));
        }

        info!(backup_id = %id, size = size, "Created backup");
        Ok(id)
    }

    /// Fetch a stored backup blob as a downloadable file
    pub async fn download_backup(&self, id: &str) -> Result<ExportFile, BackupError> {
        let key = Self::blob_key(id);
        let blob = self
            .with_kv(move |kv| kv.get(&key))
            .await?
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let short: String = id.chars().take(8).collect();
        Ok(ExportFile {
            file_name: format!("security-dashboard-backup-{}.json", short),
            contents: blob.into_bytes(),
        })
    }

    /// Export change logs from the last `days` days
    ///
    /// A span reaching past the earliest representable time exports
    /// everything.
    pub async fn download_change_logs(&self, days: u32) -> ExportFile {
        let now = self.clock.now();
        let cutoff = window_start(now, Duration::days(i64::from(days)));

        let logs: Vec<ChangeLogEntry> = {
            let state = self.state.read().await;
            state
                .change_logs
                .iter()
                .filter(|log| log.timestamp >= cutoff)
                .cloned()
                .collect()
        };

        let export = ChangeLogExport {
            logs,
            exported: now,
            period: format!("{} days", days),
            user: self.user.clone(),
        };

        // Serializing owned plain data does not fail
        let contents = serde_json::to_vec_pretty(&export).unwrap_or_default();
        ExportFile {
            file_name: format!("change-logs-{}days-{}.json", days, now.format("%Y-%m-%d")),
            contents,
        }
    }

    /// Remove logs and backups older than the retention window
    pub async fn sweep(&self) -> SweepReport {
        let cutoff = window_start(self.clock.now(), self.limits.retention);
        let mut state = self.state.write().await;

        let logs_before = state.change_logs.len();
        state.change_logs.retain(|log| log.timestamp >= cutoff);

        let (kept, expired): (Vec<Backup>, Vec<Backup>) = std::mem::take(&mut state.backups)
            .into_iter()
            .partition(|backup| backup.timestamp >= cutoff);
        state.backups = kept;

        for backup in &expired {
            let key = Self::blob_key(&backup.id);
            if let Err(e) = self.with_kv(move |kv| kv.remove(&key)).await {
                warn!(backup_id = %backup.id, error = %e, "Failed to remove backup blob");
            }
        }

        let report = SweepReport {
            removed_logs: logs_before - state.change_logs.len(),
            removed_backups: expired.len(),
        };

        if !report.is_empty() {
            self.save_logged(&state).await;
            info!(
                removed_logs = report.removed_logs,
                removed_backups = report.removed_backups,
                "Swept expired backup data"
            );
        }
        report
    }

    /// User-triggered sweep; records the cleanup when anything was removed
    pub async fn clear_old_data(&self) -> SweepReport {
        let report = self.sweep().await;
        if !report.is_empty() {
            self.add_change_log(NewChangeLog::new(
                ActionKind::Backup,
                "Cleaned up old data and backups",
            ))
            .await;
        }
        report
    }

    pub async fn storage_stats(&self) -> StorageStats {
        let state = self.state.read().await;
        self.stats_for(&state)
    }

    /// Newest change logs, up to `limit`
    pub async fn change_logs(&self, limit: Option<usize>) -> Vec<ChangeLogEntry> {
        let state = self.state.read().await;
        let limit = limit.unwrap_or(state.change_logs.len());
        state.change_logs.iter().take(limit).cloned().collect()
    }

    /// Backups, newest first
    pub async fn backups(&self) -> Vec<Backup> {
        self.state.read().await.backups.clone()
    }
}

/// Handle to the change-log append operation
///
/// Given to components that perform trackable actions so they can record
/// them without access to the rest of the store.
#[derive(Clone)]
pub struct ChangeRecorder {
    store: Arc<BackupStore>,
}

impl ChangeRecorder {
    pub fn new(store: Arc<BackupStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: NewChangeLog) -> ChangeLogEntry {
        self.store.add_change_log(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::persist::{FileKeyValueStore, MemoryKeyValueStore};
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with(kv: Box<dyn KeyValueStore>, limits: StoreLimits) -> (BackupStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = BackupStore::open(None, kv, clock.clone(), limits);
        (store, clock)
    }

    fn memory_store() -> (BackupStore, Arc<ManualClock>) {
        store_with(Box::new(MemoryKeyValueStore::new()), StoreLimits::default())
    }

    fn scan(details: &str) -> NewChangeLog {
        NewChangeLog::new(ActionKind::Scan, details).repository("org/repo1")
    }

    #[tokio::test]
    async fn test_change_log_ring_buffer_keeps_newest_1000() {
        let (store, _clock) = memory_store();

        for i in 0..1500 {
            store.add_change_log(scan(&format!("entry {}", i))).await;
        }

        let logs = store.change_logs(None).await;
        assert_eq!(logs.len(), 1000);
        assert_eq!(logs[0].details, "entry 1499");
        assert_eq!(logs[999].details, "entry 500");
    }

    #[tokio::test]
    async fn test_change_log_assigns_unique_ids() {
        let (store, _clock) = memory_store();
        let a = store.add_change_log(scan("a")).await;
        let b = store.add_change_log(scan("b")).await;

        assert_ne!(a.id, b.id);
        assert_eq!(a.timestamp, start());
    }

    #[tokio::test]
    async fn test_backup_round_trip() {
        let (store, clock) = memory_store();
        store.add_change_log(scan("before backup")).await;

        let before = clock.now();
        let id = store
            .create_backup(vec!["org/repo1".to_string(), "org/repo2".to_string()])
            .await
            .unwrap();
        let after = clock.now();

        let file = store.download_backup(&id).await.unwrap();
        assert_eq!(file.file_name, format!("security-dashboard-backup-{}.json", &id[..8]));

        let payload: BackupPayload = serde_json::from_slice(&file.contents).unwrap();
        assert_eq!(payload.repositories, vec!["org/repo1", "org/repo2"]);
        assert!(payload.timestamp >= before && payload.timestamp <= after);
        assert_eq!(payload.change_logs.len(), 1);

        let backups = store.backups().await;
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].size, file.contents.len() as u64);

        // Creating the backup is itself recorded
        let logs = store.change_logs(Some(1)).await;
        assert_eq!(logs[0].action, ActionKind::Backup);
        assert_eq!(logs[0].details, "Created backup for 2 repositories");
    }

    #[tokio::test]
    async fn test_backup_includes_only_recent_log_slice() {
        let (store, _clock) = memory_store();
        for i in 0..150 {
            store.add_change_log(scan(&format!("entry {}", i))).await;
        }

        let id = store.create_backup(vec!["org/repo1".to_string()]).await.unwrap();
        let payload: BackupPayload =
            serde_json::from_slice(&store.download_backup(&id).await.unwrap().contents).unwrap();

        assert_eq!(payload.change_logs.len(), 100);
        assert_eq!(payload.change_logs[0].details, "entry 149");
    }

    #[tokio::test]
    async fn test_download_missing_backup_is_not_found() {
        let (store, _clock) = memory_store();
        let err = store.download_backup("does-not-exist").await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(id) if id == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_create_backup_surfaces_persistence_failure() {
        let kv = MemoryKeyValueStore::with_capacity_limit(64);
        let (store, _clock) = store_with(Box::new(kv), StoreLimits::default());

        let err = store
            .create_backup(vec!["org/a-repository-with-a-long-name".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Creation { .. }));
        assert!(store.backups().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsaved_backup_record_leaves_nothing_behind() {
        // The blob fits the capacity but the collections record does not
        let kv = Arc::new(MemoryKeyValueStore::with_capacity_limit(300));
        let (store, _clock) = store_with(Box::new(SharedKv(Arc::clone(&kv))), StoreLimits::default());

        let err = store
            .create_backup(vec!["org/repo1".to_string()])
            .await
            .unwrap_err();
        match err {
            BackupError::Creation { reason } => assert!(reason.contains("backup record")),
            other => panic!("Expected Creation error, got {:?}", other),
        }

        assert!(store.backups().await.is_empty());
        assert!(store.change_logs(None).await.is_empty());
        assert_eq!(kv.len(), 0);

        let (reopened, _clock) = store_with(Box::new(SharedKv(kv)), StoreLimits::default());
        assert!(reopened.backups().await.is_empty());
    }

    #[tokio::test]
    async fn test_quota_headroom_counts_blobs() {
        let (reference, _clock) = memory_store();
        reference.create_backup(vec!["org/repo1".to_string()]).await.unwrap();
        let first = reference.storage_stats().await;

        let limits = StoreLimits {
            quota_bytes: first.stored + 10,
            ..StoreLimits::default()
        };
        let (store, _clock) = store_with(Box::new(MemoryKeyValueStore::new()), limits);
        store.create_backup(vec!["org/repo1".to_string()]).await.unwrap();

        let stats = store.storage_stats().await;
        assert_eq!(stats.stored, stats.used + stats.blob_bytes);
        assert_eq!(stats.available, 10);
        assert!(stats.is_near_quota());

        let err = store
            .create_backup(vec!["org/repo1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Creation { .. }));
        assert_eq!(store.storage_stats().await.available, 10);
    }

    #[tokio::test]
    async fn test_create_backup_refuses_over_quota() {
        let limits = StoreLimits {
            quota_bytes: 200,
            ..StoreLimits::default()
        };
        let (store, _clock) = store_with(Box::new(MemoryKeyValueStore::new()), limits);

        let err = store
            .create_backup(vec!["org/repo1".to_string(); 20])
            .await
            .unwrap_err();
        match err {
            BackupError::Creation { reason } => assert!(reason.contains("quota")),
            other => panic!("Expected Creation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retention_sweep_removes_exactly_old_data() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let store = BackupStore::open(
            None,
            Box::new(SharedKv(Arc::clone(&kv))),
            clock.clone(),
            StoreLimits::default(),
        );

        store.add_change_log(scan("old")).await;
        let old_backup = store.create_backup(vec!["org/old".to_string()]).await.unwrap();

        clock.advance(Duration::days(6));
        store.add_change_log(scan("new")).await;
        let new_backup = store.create_backup(vec!["org/new".to_string()]).await.unwrap();

        clock.advance(Duration::days(2));
        let report = store.sweep().await;
        // "old" scan plus its backup log entry
        assert_eq!(report.removed_logs, 2);
        assert_eq!(report.removed_backups, 1);

        let details: Vec<String> = store
            .change_logs(None)
            .await
            .into_iter()
            .map(|l| l.details)
            .collect();
        assert_eq!(details, vec!["Created backup for 1 repositories", "new"]);

        let backups: Vec<String> = store.backups().await.into_iter().map(|b| b.id).collect();
        assert_eq!(backups, vec![new_backup.clone()]);
        assert!(!kv.contains(&format!("backup_{}", old_backup)));
        assert!(kv.contains(&format!("backup_{}", new_backup)));

        let again = store.sweep().await;
        assert!(again.is_empty());
        assert_eq!(store.change_logs(None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_old_data_records_once() {
        let (store, clock) = memory_store();
        store.add_change_log(scan("old")).await;
        clock.advance(Duration::days(8));

        let first = store.clear_old_data().await;
        assert_eq!(first.removed_logs, 1);
        let second = store.clear_old_data().await;
        assert!(second.is_empty());

        let logs = store.change_logs(None).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].details, "Cleaned up old data and backups");
    }

    #[tokio::test]
    async fn test_storage_stats_track_serialized_collections() {
        let (store, _clock) = memory_store();
        for i in 0..25 {
            store.add_change_log(scan(&format!("entry {}", i))).await;
        }
        store.create_backup(vec!["org/repo1".to_string()]).await.unwrap();

        let logs = store.change_logs(None).await;
        let backups = store.backups().await;
        let expected = serde_json::to_vec(&serde_json::json!({
            "changeLogs": logs,
            "backups": backups,
        }))
        .unwrap()
        .len() as u64;

        let stats = store.storage_stats().await;
        assert_eq!(stats.used, expected);
        assert_eq!(stats.available, stats.quota - expected - backups[0].size);
        assert_eq!(stats.logs, 26);
        assert_eq!(stats.backups, 1);
        assert_eq!(stats.blob_bytes, backups[0].size);
    }

    #[tokio::test]
    async fn test_download_change_logs_filters_by_days() {
        let (store, clock) = memory_store();
        store.add_change_log(scan("ten days ago")).await;
        clock.advance(Duration::days(7));
        store.add_change_log(scan("three days ago")).await;
        clock.advance(Duration::days(3));

        let file = store.download_change_logs(DEFAULT_EXPORT_DAYS).await;
        assert_eq!(file.file_name, "change-logs-7days-2026-03-11.json");

        let export: ChangeLogExport = serde_json::from_slice(&file.contents).unwrap();
        assert_eq!(export.period, "7 days");
        assert_eq!(export.logs.len(), 1);
        assert_eq!(export.logs[0].details, "three days ago");
        assert_eq!(export.exported, clock.now());
    }

    #[tokio::test]
    async fn test_download_change_logs_unbounded_span() {
        let (store, clock) = memory_store();
        store.add_change_log(scan("long ago")).await;
        clock.advance(Duration::days(400));
        store.add_change_log(scan("today")).await;

        let file = store.download_change_logs(u32::MAX).await;
        let export: ChangeLogExport = serde_json::from_slice(&file.contents).unwrap();
        assert_eq!(export.logs.len(), 2);
        assert_eq!(export.period, format!("{} days", u32::MAX));
    }

    #[tokio::test]
    async fn test_download_change_logs_empty_is_valid() {
        let (store, _clock) = memory_store();
        let export = store.download_change_logs(1).await.json().unwrap();
        assert_eq!(export["logs"], serde_json::json!([]));
        assert!(export.get("exported").is_some());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let id = {
            let kv = FileKeyValueStore::new(dir.path().to_path_buf()).unwrap();
            let store = BackupStore::open(
                Some("octocat".to_string()),
                Box::new(kv),
                clock.clone(),
                StoreLimits::default(),
            );
            store.add_change_log(scan("persisted")).await;
            store.create_backup(vec!["org/repo1".to_string()]).await.unwrap()
        };

        assert!(dir.path().join("backup_data_octocat.json").exists());

        let kv = FileKeyValueStore::new(dir.path().to_path_buf()).unwrap();
        let store = BackupStore::open(
            Some("octocat".to_string()),
            Box::new(kv),
            clock.clone(),
            StoreLimits::default(),
        );
        assert_eq!(store.change_logs(None).await.len(), 2);
        assert!(store.download_backup(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_record_starts_empty() {
        let kv = MemoryKeyValueStore::new();
        kv.set("backup_data_demo", "{not json").unwrap();
        let (store, _clock) = store_with(Box::new(kv), StoreLimits::default());

        assert!(store.change_logs(None).await.is_empty());
        assert_eq!(store.user_key(), DEMO_USER);
    }

    #[tokio::test]
    async fn test_change_recorder_appends() {
        let (store, _clock) = memory_store();
        let store = Arc::new(store);
        let recorder = ChangeRecorder::new(Arc::clone(&store));

        recorder
            .record(NewChangeLog::new(ActionKind::PermissionChange, "Granted read access"))
            .await;

        let logs = store.change_logs(None).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ActionKind::PermissionChange);
    }

    /// Lets a test keep a handle on the store's key-value backend
    struct SharedKv(Arc<MemoryKeyValueStore>);

    impl KeyValueStore for SharedKv {
        fn get(&self, key: &str) -> Result<Option<String>, crate::backup::errors::PersistError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), crate::backup::errors::PersistError> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<bool, crate::backup::errors::PersistError> {
            self.0.remove(key)
        }
    }
}
