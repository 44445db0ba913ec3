//! Daemon configuration
//!
//! Loaded from TOML, then overridden from the environment. Every field has a
//! default so the daemon runs without a config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::backup::StoreLimits;
use crate::gateway::GatewayConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the dashboard being fronted
    pub origin: String,
    /// Resources cached at install, relative to `origin`
    pub bootstrap_resources: Vec<String>,
    /// URL fragment that marks backup-class requests
    pub backup_path_segment: String,
    pub data_dir: PathBuf,
    /// Where downloads are written; defaults to the user's download dir
    pub export_dir: Option<PathBuf>,
    pub socket_path: PathBuf,
    pub network_timeout_secs: u64,
    pub retention_days: u32,
    pub sweep_interval_secs: u64,
    pub probe_interval_secs: u64,
    /// URL probed for connectivity; defaults to `origin`
    pub probe_url: Option<String>,
    pub quota_bytes: u64,
    pub max_change_logs: usize,
    pub backup_log_slice: usize,
    /// Signed-in user; the store falls back to the demo user
    pub user_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            bootstrap_resources: vec![
                "/".to_string(),
                "/static/js/bundle.js".to_string(),
                "/static/css/main.css".to_string(),
                "/manifest.json".to_string(),
            ],
            backup_path_segment: "/api/backup".to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("shieldsync"),
            export_dir: None,
            socket_path: PathBuf::from("/tmp/shieldsync.sock"),
            network_timeout_secs: 5,
            retention_days: 7,
            sweep_interval_secs: 24 * 60 * 60,
            probe_interval_secs: 30,
            probe_url: None,
            quota_bytes: 50 * 1024 * 1024,
            max_change_logs: 1000,
            backup_log_slice: 100,
            user_id: None,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Search order:
    /// 1. Explicit path if provided (or `SHIELDSYNC_CONFIG`)
    /// 2. ./shieldsync.toml
    /// 3. $XDG_CONFIG_HOME/shieldsync/config.toml
    ///
    /// Falls back to defaults when no file exists. Environment overrides are
    /// applied last.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os("SHIELDSYNC_CONFIG").map(PathBuf::from);
        let explicit = explicit_path.map(Path::to_path_buf).or(env_path);

        let path = match explicit {
            Some(p) if p.exists() => Some(p),
            Some(p) => bail!("Config file not found: {}", p.display()),
            None => Self::find_config_file(),
        };

        let mut config = match path {
            Some(p) => Self::load_from_path(&p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from("shieldsync.toml");
        if local.exists() {
            return Some(local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_path = config_dir.join("shieldsync").join("config.toml");
            if xdg_path.exists() {
                return Some(xdg_path);
            }
        }

        None
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_env_overrides<E: Fn(&str) -> Option<String>>(&mut self, env: E) {
        if let Some(user) = env("SHIELDSYNC_USER") {
            self.user_id = Some(user);
        }
        if let Some(origin) = env("SHIELDSYNC_ORIGIN") {
            self.origin = origin;
        }
        if let Some(dir) = env("SHIELDSYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(socket) = env("SHIELDSYNC_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin URL: {}", self.origin))?;
        if self.network_timeout_secs == 0 {
            bail!("network_timeout_secs must be greater than zero");
        }
        if self.retention_days == 0 {
            bail!("retention_days must be greater than zero");
        }
        if self.sweep_interval_secs == 0 || self.probe_interval_secs == 0 {
            bail!("sweep and probe intervals must be greater than zero");
        }
        if self.backup_path_segment.is_empty() {
            bail!("backup_path_segment must not be empty");
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| self.data_dir.join("exports"))
    }

    pub fn probe_url(&self) -> String {
        self.probe_url.clone().unwrap_or_else(|| self.origin.clone())
    }

    pub fn gateway(&self) -> Result<GatewayConfig> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| anyhow!("Invalid origin URL {}: {}", self.origin, e))?;
        Ok(GatewayConfig {
            origin,
            bootstrap_resources: self.bootstrap_resources.clone(),
            backup_path_segment: self.backup_path_segment.clone(),
            network_timeout: self.network_timeout(),
            retention: self.retention(),
        })
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            quota_bytes: self.quota_bytes,
            max_change_logs: self.max_change_logs,
            backup_log_slice: self.backup_log_slice,
            retention: self.retention(),
        }
    }
}
