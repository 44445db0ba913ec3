//! IPC Server - Unix socket server for dashboard clients
//!
//! Handles incoming connections and dispatches commands to the gateway, the
//! backup store and the sync coordinator.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupError, BackupStore, ChangeRecorder, ExportFile, DEFAULT_EXPORT_DAYS};
use crate::gateway::{CacheGateway, GatewayEvent, GatewayOutcome, Lifecycle};
use crate::ipc::protocol::{parse_command, serialize_response, Command, Response, PROTOCOL_VERSION};
use crate::net::Fetcher;
use crate::sync::{Connectivity, SyncCoordinator};

/// Shared handles the command handlers work against
pub struct DaemonContext<F: Fetcher> {
    pub gateway: Arc<CacheGateway<F>>,
    pub store: Arc<BackupStore>,
    pub recorder: ChangeRecorder,
    pub coordinator: Arc<SyncCoordinator<F>>,
    pub connectivity: Arc<Connectivity>,
    /// Where downloads and exports are written
    pub export_dir: PathBuf,
}

/// IPC Server that listens for commands from dashboard clients
pub struct IpcServer<F: Fetcher> {
    context: Arc<DaemonContext<F>>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl<F: Fetcher + 'static> IpcServer<F> {
    pub fn new(context: Arc<DaemonContext<F>>, socket_path: PathBuf) -> Self {
        Self {
            context,
            socket_path,
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.socket_path)
                .await
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket {:?}", self.socket_path))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let context = Arc::clone(&self.context);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, context, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub async fn stop(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.socket_path)
                .await
                .context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection<F: Fetcher>(
    stream: UnixStream,
    context: Arc<DaemonContext<F>>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Newline-delimited JSON, one response per command
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &context).await,
                    Err(e) => {
                        warn!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                if let Err(e) = write_response(&mut writer, &response).await {
                    error!(error = %e, "Failed to write response");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let json = serialize_response(response).context("Failed to serialize response")?;
    writer.write_all(&json).await?;
    Ok(())
}

fn backup_error(e: BackupError) -> Response {
    let error = match e {
        BackupError::Creation { reason } => format!("Failed to create backup: {}", reason),
        BackupError::NotFound(id) => format!("Backup {} not found", id),
        BackupError::Persistence(e) => format!("Backup storage unavailable: {}", e),
    };
    Response::Error { error }
}

async fn write_export(export: ExportFile, dir: &std::path::Path) -> Response {
    match export.write_into(dir).await {
        Ok(path) => Response::Exported {
            path: path.to_string_lossy().to_string(),
        },
        Err(e) => Response::Error {
            error: format!("Failed to write {}: {:#}", export.file_name, e),
        },
    }
}

/// Process a command and return a response
async fn process_command<F: Fetcher>(command: Command, context: &DaemonContext<F>) -> Response {
    match command {
        Command::CleanupBackups => {
            info!("Processing cleanupBackups command");
            context.coordinator.request_cleanup();
            Response::Accepted {
                message: "Cleanup scheduled".to_string(),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            let stats = context.gateway.stats().await;
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: stats.lifecycle == Lifecycle::Activated,
                online: context.connectivity.is_online(),
                lifecycle: stats.lifecycle.as_str().to_string(),
                coordinator: context.coordinator.state(),
                app_shell_entries: stats.app_shell_entries,
                backup_entries: stats.backup_entries,
                cache_hit_rate: stats.index.hit_rate,
            }
        }

        Command::GetStorageStats => {
            let stats = context.store.storage_stats().await;
            Response::StorageStats {
                near_quota: stats.is_near_quota(),
                stats,
            }
        }

        Command::AddChangeLog { entry } => {
            let entry = context.recorder.record(entry).await;
            Response::Success {
                message: Some(entry.id),
            }
        }

        Command::ListChangeLogs { limit } => Response::ChangeLogs {
            logs: context.store.change_logs(limit).await,
        },

        Command::ListBackups => Response::Backups {
            backups: context.store.backups().await,
        },

        Command::CreateBackup { repositories } => {
            info!(repositories = repositories.len(), "Processing createBackup command");
            match context.store.create_backup(repositories).await {
                Ok(backup_id) => Response::BackupCreated { backup_id },
                Err(e) => backup_error(e),
            }
        }

        Command::DownloadBackup { backup_id } => {
            match context.store.download_backup(&backup_id).await {
                Ok(export) => write_export(export, &context.export_dir).await,
                Err(e) => backup_error(e),
            }
        }

        Command::ExportChangeLogs { days } => {
            let export = context
                .store
                .download_change_logs(days.unwrap_or(DEFAULT_EXPORT_DAYS))
                .await;
            write_export(export, &context.export_dir).await
        }

        Command::ClearOldData => {
            let report = context.store.clear_old_data().await;
            Response::Success {
                message: Some(format!(
                    "Removed {} change logs and {} backups",
                    report.removed_logs, report.removed_backups
                )),
            }
        }

        Command::SetOnline { online } => {
            context.connectivity.set_online(online);
            Response::Success { message: None }
        }

        Command::Fetch { request } => {
            debug!(method = %request.method, url = %request.url, "Processing fetch command");
            match context.gateway.dispatch(GatewayEvent::Fetch(request)).await {
                Ok(GatewayOutcome::Response(response)) => Response::Fetched { response },
                Ok(other) => Response::Error {
                    error: format!("Unexpected gateway outcome: {:?}", other),
                },
                Err(e) => Response::Error {
                    error: e.to_string(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{MemoryKeyValueStore, StoreLimits};
    use crate::clock::ManualClock;
    use crate::gateway::{GatewayConfig, PartitionStore};
    use crate::net::Request;
    use crate::testing::{ok_text, ScriptedFetcher};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    struct Harness {
        dir: TempDir,
        fetcher: Arc<ScriptedFetcher>,
        context: Arc<DaemonContext<ScriptedFetcher>>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let config = GatewayConfig {
            origin: Url::parse("http://localhost:8080").unwrap(),
            bootstrap_resources: Vec::new(),
            backup_path_segment: "/api/backup".to_string(),
            network_timeout: Duration::from_secs(2),
            retention: chrono::Duration::days(7),
        };
        let gateway = Arc::new(CacheGateway::new(
            config,
            Arc::clone(&fetcher),
            PartitionStore::new(dir.path().join("cache")).unwrap(),
            clock.clone(),
        ));
        let store = Arc::new(BackupStore::open(
            Some("octocat".to_string()),
            Box::new(MemoryKeyValueStore::new()),
            clock,
            StoreLimits::default(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Duration::from_secs(3600),
        ));
        let context = Arc::new(DaemonContext {
            gateway,
            recorder: ChangeRecorder::new(Arc::clone(&store)),
            store,
            coordinator,
            connectivity: Arc::new(Connectivity::new(true)),
            export_dir: dir.path().join("exports"),
        });
        Harness {
            dir,
            fetcher,
            context,
        }
    }

    #[tokio::test]
    async fn test_cleanup_backups_is_acknowledged() {
        let h = harness();
        let response = process_command(Command::CleanupBackups, &h.context).await;
        assert!(matches!(response, Response::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_backup_create_and_download() {
        let h = harness();

        let response = process_command(
            Command::CreateBackup {
                repositories: vec!["acme/api".to_string(), "acme/web".to_string()],
            },
            &h.context,
        )
        .await;
        let backup_id = match response {
            Response::BackupCreated { backup_id } => backup_id,
            other => panic!("Expected backupCreated, got {:?}", other),
        };

        let response = process_command(Command::DownloadBackup { backup_id }, &h.context).await;
        let path = match response {
            Response::Exported { path } => PathBuf::from(path),
            other => panic!("Expected exported, got {:?}", other),
        };
        assert!(path.starts_with(h.dir.path().join("exports")));

        let payload: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(payload["repositories"][1], "acme/web");

        match process_command(Command::ListChangeLogs { limit: Some(1) }, &h.context).await {
            Response::ChangeLogs { logs } => {
                assert_eq!(logs.len(), 1);
                assert_eq!(logs[0].details, "Created backup for 2 repositories");
            }
            other => panic!("Expected changeLogs, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_backup_is_an_error() {
        let h = harness();
        let response = process_command(
            Command::DownloadBackup {
                backup_id: "missing".to_string(),
            },
            &h.context,
        )
        .await;
        match response {
            Response::Error { error } => assert!(error.contains("missing")),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_routes_through_gateway() {
        let h = harness();
        let url = "http://localhost:8080/api/backup/latest";
        h.fetcher.respond(url, ok_text("snapshot"));

        match process_command(Command::Fetch { request: Request::get(url) }, &h.context).await {
            Response::Fetched { response } => assert_eq!(response.body, b"snapshot"),
            other => panic!("Expected fetched, got {:?}", other),
        }

        h.fetcher.set_offline(true);
        match process_command(Command::Fetch { request: Request::get(url) }, &h.context).await {
            Response::Fetched { response } => assert_eq!(response.body, b"snapshot"),
            other => panic!("Expected fetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_online_updates_status() {
        let h = harness();
        process_command(Command::SetOnline { online: false }, &h.context).await;

        match process_command(Command::GetStatus, &h.context).await {
            Response::Status {
                online, lifecycle, ..
            } => {
                assert!(!online);
                assert_eq!(lifecycle, "new");
            }
            other => panic!("Expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_command_keeps_connection_open() {
        let h = harness();
        let (client, server) = UnixStream::pair().unwrap();
        let handler = tokio::spawn(handle_connection(
            server,
            Arc::clone(&h.context),
            Arc::new(RwLock::new(0)),
        ));

        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{\"type\":\"NOPE\"}\n").await.unwrap();
        let first: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["type"], "error");

        writer.write_all(b"{\"type\":\"GET_STORAGE_STATS\"}\n").await.unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["type"], "storageStats");
        assert_eq!(second["stats"]["logs"], 0);

        drop(writer);
        handler.await.unwrap().unwrap();
    }
}
