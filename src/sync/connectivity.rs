//! Connectivity tracking
//!
//! Online/offline state is a watch channel. It is fed by explicit reports
//! (IPC `SET_ONLINE`) and by a periodic probe against the origin.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::net::{Fetcher, Request};

/// Shared online/offline flag
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report the current state; subscribers only wake on a change
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online = online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probe `probe` every `interval` until shutdown
///
/// Any HTTP answer counts as online; transport failures and timeouts count
/// as offline.
pub async fn run_probe<F: Fetcher>(
    connectivity: Arc<Connectivity>,
    fetcher: Arc<F>,
    probe: Request,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = matches!(
                    tokio::time::timeout(timeout, fetcher.fetch(&probe)).await,
                    Ok(Ok(_))
                );
                debug!(url = %probe.url, online = online, "Connectivity probe");
                connectivity.set_online(online);
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Connectivity probe stopped");
}
