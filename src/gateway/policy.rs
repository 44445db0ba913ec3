//! Cache policy decisions
//!
//! Pure functions from (event, cached state) to (response, mutation). The
//! gateway performs the I/O and applies whatever mutation these return.

use chrono::{DateTime, Utc};

use super::storage::CachedResponse;
use crate::net::{Request, RequestKey, Response};

/// Partition holding bootstrap resources, populated only at install
pub const APP_SHELL_PARTITION: &str = "app-shell-v2";

/// Partition holding network-first backup responses
pub const BACKUP_PARTITION: &str = "backup-data-v1";

/// Partitions that survive activation
pub const CURRENT_PARTITIONS: [&str; 2] = [APP_SHELL_PARTITION, BACKUP_PARTITION];

/// How a request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Network-first, cached in the backup partition
    Backup,
    /// Cache-first against the app-shell partition
    AppShell,
}

/// A change to apply to the partition store
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMutation {
    Put(CachedResponse),
    Delete { partition: String, key: RequestKey },
}

/// Response to hand back plus the mutation that goes with it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub response: Response,
    pub mutation: Option<CacheMutation>,
}

impl Resolution {
    fn respond(response: Response) -> Self {
        Self {
            response,
            mutation: None,
        }
    }
}

/// Outcome of a cache-first lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Response),
    Miss,
}

pub fn classify(request: &Request, backup_segment: &str) -> RequestClass {
    if request.url.contains(backup_segment) {
        RequestClass::Backup
    } else {
        RequestClass::AppShell
    }
}

/// Network-first, network answered
///
/// Successful responses are stored in the backup partition. Anything else is
/// passed through untouched.
pub fn network_success(request: &Request, response: Response, now: DateTime<Utc>) -> Resolution {
    if !response.is_ok() {
        return Resolution::respond(response);
    }

    let stored = CachedResponse {
        request: request.clone(),
        response: stamp_date(response.clone(), now),
        partition: BACKUP_PARTITION.to_string(),
        captured_at: now,
    };

    Resolution {
        response,
        mutation: Some(CacheMutation::Put(stored)),
    }
}

/// Network-first, network failed: serve the cached copy or a placeholder
pub fn network_failure(cached: Option<CachedResponse>) -> Response {
    match cached {
        Some(entry) => entry.response,
        None => Response::offline_placeholder(),
    }
}

/// Cache-first lookup result
pub fn cache_first(cached: Option<CachedResponse>) -> CacheLookup {
    match cached {
        Some(entry) => CacheLookup::Hit(entry.response),
        None => CacheLookup::Miss,
    }
}

/// Partitions to delete at activation: everything not current
pub fn stale_partitions(existing: &[String]) -> Vec<String> {
    existing
        .iter()
        .filter(|name| !CURRENT_PARTITIONS.contains(&name.as_str()))
        .cloned()
        .collect()
}

/// Mutations removing entries captured before `cutoff`
pub fn expire_before(entries: &[CachedResponse], cutoff: DateTime<Utc>) -> Vec<CacheMutation> {
    entries
        .iter()
        .filter(|entry| entry.captured_time() < cutoff)
        .map(|entry| CacheMutation::Delete {
            partition: entry.partition.clone(),
            key: entry.key(),
        })
        .collect()
}

/// Add a `date` header when the response has none
pub fn stamp_date(mut response: Response, now: DateTime<Utc>) -> Response {
    if response.header("date").is_none() {
        response
            .headers
            .insert("date".to_string(), now.to_rfc2822());
    }
    response
}
