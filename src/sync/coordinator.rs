//! Sync Coordinator
//!
//! Replays cached backup requests when connectivity returns and runs the
//! retention sweep on a timer or on request. One activity runs at a time:
//! `Idle -> Replaying -> Idle` or `Idle -> Sweeping -> Idle`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::connectivity::Connectivity;
use crate::backup::{BackupStore, SweepReport};
use crate::gateway::{CacheGateway, GatewayEvent, GatewayOutcome, MaintenanceMessage};
use crate::net::Fetcher;

/// Pending manual cleanups; extra requests beyond this are coalesced
const CLEANUP_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoordinatorState {
    Idle,
    Replaying,
    Sweeping,
}

/// Outcome of a reconnect replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// URLs re-delivered successfully
    pub delivered: Vec<String>,
    /// URLs whose replay failed
    pub failed: Vec<String>,
}

/// Outcome of a retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub store: SweepReport,
    pub expired_responses: usize,
}

pub struct SyncCoordinator<F: Fetcher> {
    gateway: Arc<CacheGateway<F>>,
    store: Arc<BackupStore>,
    sweep_interval: Duration,
    state: Mutex<CoordinatorState>,
    /// Serializes replays and sweeps
    activity: tokio::sync::Mutex<()>,
    cleanup_tx: mpsc::Sender<()>,
    cleanup_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl<F: Fetcher> SyncCoordinator<F> {
    pub fn new(
        gateway: Arc<CacheGateway<F>>,
        store: Arc<BackupStore>,
        sweep_interval: Duration,
    ) -> Self {
        let (cleanup_tx, cleanup_rx) = mpsc::channel(CLEANUP_QUEUE_DEPTH);
        Self {
            gateway,
            store,
            sweep_interval,
            state: Mutex::new(CoordinatorState::Idle),
            activity: tokio::sync::Mutex::new(()),
            cleanup_tx,
            cleanup_rx: Mutex::new(Some(cleanup_rx)),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: CoordinatorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Re-deliver every request held in the backup partition
    ///
    /// Each replay runs in its own task; failures are logged and reported
    /// without affecting the others.
    pub async fn replay_backup_requests(&self) -> ReplayReport {
        let _activity = self.activity.lock().await;
        self.set_state(CoordinatorState::Replaying);

        let requests = match self.gateway.backup_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "Backup sync failed");
                self.set_state(CoordinatorState::Idle);
                return ReplayReport::default();
            }
        };

        info!(count = requests.len(), "Replaying cached backup requests");

        let mut tasks = JoinSet::new();
        for request in requests {
            let gateway = Arc::clone(&self.gateway);
            tasks.spawn(async move {
                let result = gateway.replay(&request).await;
                (request.url, result)
            });
        }

        let mut report = ReplayReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(_))) => {
                    info!(url = %url, "Synced backup data");
                    report.delivered.push(url);
                }
                Ok((url, Err(e))) => {
                    warn!(url = %url, error = %e, retryable = e.is_retryable(), "Failed to sync backup data");
                    report.failed.push(url);
                }
                Err(e) => {
                    error!(error = %e, "Replay task panicked");
                }
            }
        }

        report.delivered.sort();
        report.failed.sort();
        self.set_state(CoordinatorState::Idle);
        report
    }

    /// Start a replay in the background and return immediately
    pub fn on_reconnect(self: &Arc<Self>) -> JoinHandle<ReplayReport> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.replay_backup_requests().await })
    }

    /// Apply retention to the backup store and the backup partition
    ///
    /// Failures are logged, never propagated.
    pub async fn sweep(&self) -> SweepSummary {
        let _activity = self.activity.lock().await;
        self.set_state(CoordinatorState::Sweeping);

        let store = self.store.sweep().await;

        let expired_responses = match self
            .gateway
            .dispatch(GatewayEvent::Message(MaintenanceMessage::CleanupBackups))
            .await
        {
            Ok(GatewayOutcome::Expired { removed }) => removed,
            Ok(other) => {
                warn!(outcome = ?other, "Unexpected outcome from cache cleanup");
                0
            }
            Err(e) => {
                warn!(error = %e, "Cache cleanup failed");
                0
            }
        };

        self.set_state(CoordinatorState::Idle);
        debug!(
            removed_logs = store.removed_logs,
            removed_backups = store.removed_backups,
            expired_responses = expired_responses,
            "Sweep finished"
        );
        SweepSummary {
            store,
            expired_responses,
        }
    }

    /// Queue a sweep on the coordinator loop
    pub fn request_cleanup(&self) {
        match self.cleanup_tx.try_send(()) {
            Ok(()) => debug!("Cleanup requested"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Cleanup already queued");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Coordinator is not running, cleanup dropped");
            }
        }
    }

    /// Coordinator loop: reconnect replays, timed sweeps and manual cleanups
    pub async fn run(self: Arc<Self>, connectivity: Arc<Connectivity>, mut shutdown: watch::Receiver<bool>) {
        let cleanup_rx = self
            .cleanup_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut cleanup_rx) = cleanup_rx else {
            warn!("Coordinator loop already running");
            return;
        };

        let mut online = connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();

        let start = tokio::time::Instant::now() + self.sweep_interval;
        let mut ticker = tokio::time::interval_at(start, self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Sync coordinator started"
        );

        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        info!("Connection restored, syncing backup data");
                        let _ = self.on_reconnect();
                    }
                    was_online = now_online;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                Some(()) = cleanup_rx.recv() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Sync coordinator stopped");
    }
}
