//! Partition Store
//!
//! Persists cached responses on local disk. Each partition is a directory
//! under the cache root; each entry is a JSON file named by the SHA-1 of its
//! request key, written atomically through a temp file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::index::{IndexStats, ResponseIndex};
use crate::net::{Request, RequestKey, Response};

/// One cached (request -> response) pair in a named partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    /// The request that produced the response, kept for replay
    pub request: Request,
    pub response: Response,
    pub partition: String,
    pub captured_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn key(&self) -> RequestKey {
        self.request.key()
    }

    /// Capture time of the response: its `date` header when parseable, else
    /// the time it was written to the cache
    pub fn captured_time(&self) -> DateTime<Utc> {
        self.response
            .header("date")
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(self.captured_at)
    }
}

/// Disk-backed partitioned response cache
pub struct PartitionStore {
    root: PathBuf,
    index: ResponseIndex,
}

impl PartitionStore {
    /// Open (creating if needed) the cache rooted at `root`
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory: {:?}", root))?;

        let store = Self {
            root,
            index: ResponseIndex::new(),
        };

        store.cleanup();

        info!(cache_dir = %store.root.display(), "Partition store initialized");
        Ok(store)
    }

    /// Names of all partitions currently on disk
    pub fn partitions(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let read_dir = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list cache directory: {:?}", self.root))?;

        for entry in read_dir.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Ensure a partition exists
    pub fn open(&self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to open partition: {}", partition))
    }

    /// Delete a partition and everything in it
    ///
    /// Returns false if the partition did not exist.
    pub fn delete_partition(&self, partition: &str) -> Result<bool> {
        let dir = self.partition_dir(partition)?;
        if !dir.exists() {
            return Ok(false);
        }

        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete partition: {}", partition))?;
        self.index.clear();

        info!(partition = partition, "Deleted cache partition");
        Ok(true)
    }

    /// Look up the cached response for a request key
    pub fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
        if let Some(entry) = self.index.get(partition, key) {
            return Ok(Some(entry));
        }

        let path = self.entry_path(partition, key)?;
        if !path.exists() {
            return Ok(None);
        }

        let entry = read_entry(&path)?;
        self.index.insert(entry.clone());
        Ok(Some(entry))
    }

    /// Store an entry, replacing any previous entry for the same key
    pub fn put(&self, entry: &CachedResponse) -> Result<()> {
        let key = entry.key();
        let path = self.entry_path(&entry.partition, &key)?;

        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("Cache entry path has no parent: {:?}", path))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create partition directory: {:?}", parent))?;

        let data = serde_json::to_vec(entry).context("Failed to serialize cache entry")?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for cache")?;
        tmp.write_all(&data).context("Failed to write cache file")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist cache file: {:?}", path))?;

        self.index.insert(entry.clone());

        debug!(
            partition = %entry.partition,
            key = %key,
            size = data.len(),
            "Stored response in cache"
        );
        Ok(())
    }

    /// Remove one entry; returns whether it existed
    pub fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
        let path = self.entry_path(partition, key)?;
        self.index.invalidate(partition, key);

        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete cache file: {:?}", path))?;

        debug!(partition = partition, key = %key, "Deleted cached response");
        Ok(true)
    }

    /// All entries in a partition
    ///
    /// Unreadable entry files are skipped with a warning.
    pub fn entries(&self, partition: &str) -> Result<Vec<CachedResponse>> {
        let dir = self.partition_dir(partition)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list partition: {}", partition))?;

        for file in read_dir.flatten() {
            let path = file.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }

        entries.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(entries)
    }

    /// Number of entries in a partition
    pub fn count(&self, partition: &str) -> usize {
        self.entries(partition).map(|e| e.len()).unwrap_or(0)
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Remove stale temp files left by interrupted writes
    pub fn cleanup(&self) {
        let Ok(partitions) = fs::read_dir(&self.root) else {
            return;
        };
        for partition in partitions.flatten() {
            let Ok(files) = fs::read_dir(partition.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                let is_tmp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(".tmp"));
                if is_tmp {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf> {
        if partition.is_empty()
            || partition.contains(['/', '\\'])
            || partition.starts_with('.')
        {
            return Err(anyhow!("Invalid partition name: {:?}", partition));
        }
        Ok(self.root.join(partition))
    }

    fn entry_path(&self, partition: &str, key: &RequestKey) -> Result<PathBuf> {
        let mut hasher = Sha1::new();
        hasher.update(key.as_str().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Ok(self.partition_dir(partition)?.join(format!("{}.json", digest)))
    }
}

fn read_entry(path: &Path) -> Result<CachedResponse> {
    let data = fs::read(path).with_context(|| format!("Failed to read cache file: {:?}", path))?;
    serde_json::from_slice(&data).with_context(|| format!("Corrupt cache file: {:?}", path))
}
