//! Cache Gateway
//!
//! Decides cache-vs-network per request and owns the on-disk partitions.
//! Lifecycle follows install -> activate; `dispatch` routes events to the
//! matching handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use url::Url;

use super::policy::{
    self, CacheLookup, CacheMutation, RequestClass, APP_SHELL_PARTITION, BACKUP_PARTITION,
    CURRENT_PARTITIONS,
};
use super::storage::{CachedResponse, PartitionStore};
use super::index::IndexStats;
use crate::clock::Clock;
use crate::net::{FetchError, Fetcher, Request, Response};

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL that bootstrap resources are resolved against
    pub origin: Url,
    /// Resources cached into the app-shell partition at install
    pub bootstrap_resources: Vec<String>,
    /// URL fragment marking backup-class requests
    pub backup_path_segment: String,
    /// Upper bound on a single network attempt
    pub network_timeout: Duration,
    /// Age after which backup responses expire
    pub retention: chrono::Duration,
}

/// Gateway lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Installed,
    Activated,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::New => "new",
            Lifecycle::Installed => "installed",
            Lifecycle::Activated => "activated",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Install failed for {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Gateway must be installed before activation")]
    NotInstalled,

    #[error("Cache storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Maintenance messages the gateway understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceMessage {
    /// Expire backup responses older than the retention window
    CleanupBackups,
}

/// Events routed through `CacheGateway::dispatch`
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(MaintenanceMessage),
}

/// Result of a dispatched event
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Installed { resources: usize },
    Activated { removed: Vec<String> },
    Response(Response),
    Expired { removed: usize },
}

/// Snapshot of gateway state
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStats {
    pub lifecycle: Lifecycle,
    pub app_shell_entries: usize,
    pub backup_entries: usize,
    pub index: IndexStats,
}

/// Request interceptor backed by persistent partitions
pub struct CacheGateway<F: Fetcher> {
    config: GatewayConfig,
    fetcher: Arc<F>,
    store: Arc<PartitionStore>,
    clock: Arc<dyn Clock>,
    lifecycle: Mutex<Lifecycle>,
}

impl<F: Fetcher> CacheGateway<F> {
    pub fn new(
        config: GatewayConfig,
        fetcher: Arc<F>,
        store: PartitionStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store: Arc::new(store),
            clock,
            lifecycle: Mutex::new(Lifecycle::New),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Run a partition store operation on the blocking pool
    async fn with_store<T, Op>(&self, op: Op) -> anyhow::Result<T>
    where
        T: Send + 'static,
        Op: FnOnce(&PartitionStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| anyhow!("Cache task failed: {}", e))?
    }

    /// Route an event to its handler
    pub async fn dispatch(&self, event: GatewayEvent) -> Result<GatewayOutcome, GatewayError> {
        match event {
            GatewayEvent::Install => {
                let resources = self.install().await?;
                Ok(GatewayOutcome::Installed { resources })
            }
            GatewayEvent::Activate => {
                let removed = self.activate().await?;
                Ok(GatewayOutcome::Activated { removed })
            }
            GatewayEvent::Fetch(request) => Ok(GatewayOutcome::Response(self.intercept(request).await)),
            GatewayEvent::Message(MaintenanceMessage::CleanupBackups) => {
                let cutoff = self.clock.now() - self.config.retention;
                let removed = self.expire_entries(cutoff).await?;
                Ok(GatewayOutcome::Expired { removed })
            }
        }
    }

    /// Populate the app-shell partition with the bootstrap resources
    ///
    /// Every resource is fetched before anything is written. If a write
    /// fails, the entries present before the install are put back.
    pub async fn install(&self) -> Result<usize, GatewayError> {
        info!(
            resources = self.config.bootstrap_resources.len(),
            "Installing cache gateway"
        );

        let mut fetched = Vec::with_capacity(self.config.bootstrap_resources.len());
        for resource in &self.config.bootstrap_resources {
            let url = self
                .config
                .origin
                .join(resource)
                .map_err(|e| GatewayError::Install {
                    url: resource.clone(),
                    reason: e.to_string(),
                })?;
            let request = Request::get(url.as_str());

            let response = self
                .fetch_with_timeout(&request)
                .await
                .map_err(|e| GatewayError::Install {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })?;
            if !response.is_ok() {
                return Err(GatewayError::Install {
                    url: request.url.clone(),
                    reason: format!("HTTP {}", response.status),
                });
            }

            let now = self.clock.now();
            fetched.push(CachedResponse {
                request,
                response: policy::stamp_date(response, now),
                partition: APP_SHELL_PARTITION.to_string(),
                captured_at: now,
            });
        }

        let count = fetched.len();
        self.with_store(move |store| {
            for partition in CURRENT_PARTITIONS {
                store.open(partition)?;
            }
            write_all_or_restore(store, &fetched)
        })
        .await?;

        self.set_lifecycle(Lifecycle::Installed);
        info!(resources = count, "Cache gateway installed");
        Ok(count)
    }

    /// Delete every partition that is not current
    ///
    /// Returns the names of the partitions removed.
    pub async fn activate(&self) -> Result<Vec<String>, GatewayError> {
        if self.lifecycle() == Lifecycle::New {
            return Err(GatewayError::NotInstalled);
        }

        let stale = self
            .with_store(|store| {
                let stale = policy::stale_partitions(&store.partitions()?);
                for name in &stale {
                    store.delete_partition(name)?;
                }
                for partition in CURRENT_PARTITIONS {
                    store.open(partition)?;
                }
                Ok(stale)
            })
            .await?;

        self.set_lifecycle(Lifecycle::Activated);
        info!(removed = ?stale, "Cache gateway activated");
        Ok(stale)
    }

    /// Serve a request; never fails
    pub async fn intercept(&self, request: Request) -> Response {
        match policy::classify(&request, &self.config.backup_path_segment) {
            RequestClass::Backup => self.network_first(request).await,
            RequestClass::AppShell => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: Request) -> Response {
        match self.fetch_with_timeout(&request).await {
            Ok(response) => {
                let resolution = policy::network_success(&request, response, self.clock.now());
                if let Some(mutation) = resolution.mutation {
                    if let Err(e) = self.apply(mutation).await {
                        warn!(url = %request.url, error = %e, "Failed to cache backup response");
                    }
                }
                resolution.response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, falling back to cache");
                let cached = match self.lookup(BACKUP_PARTITION, &request).await {
                    Ok(cached) => cached,
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Backup partition unavailable");
                        None
                    }
                };
                policy::network_failure(cached)
            }
        }
    }

    async fn cache_first(&self, request: Request) -> Response {
        let cached = match self.lookup(APP_SHELL_PARTITION, &request).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(url = %request.url, error = %e, "App-shell lookup failed");
                None
            }
        };

        match policy::cache_first(cached) {
            CacheLookup::Hit(response) => response,
            CacheLookup::Miss => match self.fetch_with_timeout(&request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Cache miss and network failed");
                    Response::offline_placeholder()
                }
            },
        }
    }

    async fn lookup(&self, partition: &'static str, request: &Request) -> anyhow::Result<Option<CachedResponse>> {
        let key = request.key();
        self.with_store(move |store| store.get(partition, &key)).await
    }

    /// Requests currently held in the backup partition
    pub async fn backup_requests(&self) -> Result<Vec<Request>, GatewayError> {
        let entries = self.with_store(|store| store.entries(BACKUP_PARTITION)).await?;
        Ok(entries.into_iter().map(|entry| entry.request).collect())
    }

    /// Re-issue a stored backup request against the network
    ///
    /// A non-2xx answer counts as a failed delivery. Successful deliveries
    /// refresh the cached copy.
    pub async fn replay(&self, request: &Request) -> Result<Response, FetchError> {
        let response = self.fetch_with_timeout(request).await?;
        if !response.is_ok() {
            return Err(FetchError::from_status(
                response.status,
                &String::from_utf8_lossy(&response.body),
            ));
        }

        let resolution = policy::network_success(request, response, self.clock.now());
        if let Some(mutation) = resolution.mutation {
            if let Err(e) = self.apply(mutation).await {
                warn!(url = %request.url, error = %e, "Failed to refresh replayed response");
            }
        }
        Ok(resolution.response)
    }

    /// Remove backup responses captured before `cutoff`
    pub async fn expire_entries(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError> {
        let removed = self
            .with_store(move |store| {
                let entries = store.entries(BACKUP_PARTITION)?;
                let mutations = policy::expire_before(&entries, cutoff);
                let removed = mutations.len();
                for mutation in mutations {
                    apply_mutation(store, mutation)?;
                }
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            info!(removed = removed, "Expired cached backup responses");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> GatewayStats {
        let lifecycle = self.lifecycle();
        let counts = self
            .with_store(|store| {
                Ok((
                    store.count(APP_SHELL_PARTITION),
                    store.count(BACKUP_PARTITION),
                ))
            })
            .await;
        let (app_shell_entries, backup_entries) = counts.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count cached entries");
            (0, 0)
        });

        GatewayStats {
            lifecycle,
            app_shell_entries,
            backup_entries,
            index: self.store.index_stats(),
        }
    }

    async fn apply(&self, mutation: CacheMutation) -> anyhow::Result<()> {
        self.with_store(move |store| apply_mutation(store, mutation)).await
    }

    async fn fetch_with_timeout(&self, request: &Request) -> Result<Response, FetchError> {
        tokio::time::timeout(self.config.network_timeout, self.fetcher.fetch(request))
            .await
            .unwrap_or(Err(FetchError::Timeout))
    }
}

fn apply_mutation(store: &PartitionStore, mutation: CacheMutation) -> anyhow::Result<()> {
    match mutation {
        CacheMutation::Put(entry) => store.put(&entry),
        CacheMutation::Delete { partition, key } => store.delete(&partition, &key).map(|_| ()),
    }
}

/// Write every entry, or put the partition back the way it was
fn write_all_or_restore(store: &PartitionStore, entries: &[CachedResponse]) -> anyhow::Result<()> {
    let mut previous = Vec::with_capacity(entries.len());
    for entry in entries {
        previous.push(store.get(&entry.partition, &entry.key())?);
    }

    for (written, entry) in entries.iter().enumerate() {
        let Err(e) = store.put(entry) else {
            continue;
        };

        for (done, before) in entries[..written].iter().zip(&previous) {
            let restored = match before {
                Some(before) => store.put(before),
                None => store.delete(&done.partition, &done.key()).map(|_| ()),
            };
            if let Err(restore_err) = restored {
                error!(
                    key = %done.key(),
                    error = %restore_err,
                    "Failed to roll back cache entry"
                );
            }
        }
        return Err(e);
    }
    Ok(())
}
