//! ShieldSync Daemon - offline cache gateway and backup store
//!
//! Fronts the security dashboard with persistent response caches, keeps the
//! change log and backups under a storage budget, and replays cached backup
//! requests when connectivity returns.

mod backup;
mod clock;
mod config;
mod gateway;
mod ipc;
mod net;
mod sync;
#[cfg(test)]
mod testing;

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use backup::{BackupStore, ChangeRecorder, FileKeyValueStore, DEFAULT_EXPORT_DAYS};
use clock::{Clock, SystemClock};
use config::Config;
use gateway::{CacheGateway, GatewayEvent, PartitionStore};
use ipc::{DaemonContext, IpcServer};
use net::{HttpFetcher, Request};
use sync::{run_probe, Connectivity, SyncCoordinator};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Run one retention sweep
    Cleanup,
    /// Print storage usage
    Stats,
    /// Back up the named repositories
    Backup { repositories: Vec<String> },
    /// Export recent change logs
    ExportLogs { days: u32 },
    /// Export a stored backup
    Download { backup_id: String },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"ShieldSync Daemon - offline cache and backups for the security dashboard

USAGE:
    shieldsync-daemon [--config <path>]                 # Run IPC server (default)
    shieldsync-daemon [--config <path>] cleanup
    shieldsync-daemon [--config <path>] stats
    shieldsync-daemon [--config <path>] backup <repo>...
    shieldsync-daemon [--config <path>] export-logs [days]
    shieldsync-daemon [--config <path>] download <backup-id>
    shieldsync-daemon help

COMMANDS:
    (none)       Run IPC server mode (waits for commands from the dashboard)
    cleanup      Remove change logs and backups past the retention window
    stats        Show backup storage usage
    backup       Create a backup of the given repositories
    export-logs  Write change logs from the last N days (default 7)
    download     Write a stored backup to the export directory
    help         Show this help message

ENVIRONMENT:
    SHIELDSYNC_CONFIG    Config file path
    SHIELDSYNC_USER      Signed-in user whose data is managed
    SHIELDSYNC_ORIGIN    Dashboard origin URL
    SHIELDSYNC_DATA_DIR  Data directory
    SHIELDSYNC_SOCKET    IPC socket path
    RUST_LOG             Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<(Option<PathBuf>, Command)> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config_path = None;
    if let Some(pos) = args.iter().position(|a| a == "--config" || a == "-c") {
        if pos + 1 >= args.len() {
            return Err(anyhow!("--config requires a path"));
        }
        config_path = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    let Some(first) = args.first() else {
        return Ok((config_path, Command::Server));
    };

    let command = match first.as_str() {
        "server" => Command::Server,
        "cleanup" => Command::Cleanup,
        "stats" => Command::Stats,
        "backup" => {
            if args.len() < 2 {
                return Err(anyhow!("Usage: shieldsync-daemon backup <repo>..."));
            }
            Command::Backup {
                repositories: args[1..].to_vec(),
            }
        }
        "export-logs" => {
            let days = match args.get(1) {
                Some(days) => days
                    .parse()
                    .map_err(|_| anyhow!("Invalid number of days: {}", days))?,
                None => DEFAULT_EXPORT_DAYS,
            };
            Command::ExportLogs { days }
        }
        "download" => {
            let backup_id = args
                .get(1)
                .cloned()
                .ok_or_else(|| anyhow!("Usage: shieldsync-daemon download <backup-id>"))?;
            Command::Download { backup_id }
        }
        "help" | "--help" | "-h" => Command::Help,
        other => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };

    Ok((config_path, command))
}

/// Open the backup store on the blocking pool; the initial load reads from disk
async fn open_store(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<BackupStore>> {
    let dir = config.store_dir();
    let user = config.user_id.clone();
    let limits = config.store_limits();

    tokio::task::spawn_blocking(move || {
        let kv = FileKeyValueStore::new(dir)?;
        Ok::<_, anyhow::Error>(Arc::new(BackupStore::open(user, Box::new(kv), clock, limits)))
    })
    .await
    .map_err(|e| anyhow!("Store open task failed: {}", e))?
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (config_path, command) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::load(config_path.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config, Arc::clone(&clock)).await?;

    match command {
        Command::Server => run_server(config, clock, store).await?,
        Command::Cleanup => {
            let report = store.clear_old_data().await;
            println!(
                "Removed {} change logs and {} backups.",
                report.removed_logs, report.removed_backups
            );
        }
        Command::Stats => {
            let stats = store.storage_stats().await;
            println!("User:       {}", store.user_key());
            println!("Used:       {} bytes", stats.used);
            println!("Available:  {} bytes", stats.available);
            println!("Quota:      {} bytes ({:.1}% used)", stats.quota, stats.usage_ratio() * 100.0);
            println!("Blobs:      {} bytes", stats.blob_bytes);
            println!("Change logs: {}", stats.logs);
            println!("Backups:    {}", stats.backups);
            if stats.is_over_quota() {
                println!("Storage is over quota; run `cleanup` or download and clear old backups.");
            }
        }
        Command::Backup { repositories } => {
            let id = store.create_backup(repositories).await?;
            println!("Created backup {}", id);
        }
        Command::ExportLogs { days } => {
            let export = store.download_change_logs(days).await;
            let path = export.write_into(&config.export_dir()).await?;
            println!("Wrote {}", path.display());
        }
        Command::Download { backup_id } => {
            let export = store.download_backup(&backup_id).await?;
            let path = export.write_into(&config.export_dir()).await?;
            println!("Wrote {}", path.display());
        }
        Command::Help => print_help(),
    }

    Ok(())
}

async fn run_server(config: Config, clock: Arc<dyn Clock>, store: Arc<BackupStore>) -> Result<()> {
    info!(origin = %config.origin, "Starting ShieldSync daemon in IPC server mode");

    let fetcher = Arc::new(HttpFetcher::new(config.network_timeout())?);
    let partitions = PartitionStore::new(config.cache_dir())?;
    let gateway = Arc::new(CacheGateway::new(
        config.gateway()?,
        Arc::clone(&fetcher),
        partitions,
        clock,
    ));

    match gateway.dispatch(GatewayEvent::Install).await {
        Ok(_) => {
            if let Err(e) = gateway.dispatch(GatewayEvent::Activate).await {
                error!(error = %e, "Gateway activation failed");
            }
        }
        Err(e) => warn!(error = %e, "Gateway install failed, serving without bootstrap cache"),
    }

    let connectivity = Arc::new(Connectivity::new(true));
    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
        std::time::Duration::from_secs(config.sweep_interval_secs),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator_handle = tokio::spawn(
        Arc::clone(&coordinator).run(Arc::clone(&connectivity), shutdown_rx.clone()),
    );
    let probe_handle = tokio::spawn(run_probe(
        Arc::clone(&connectivity),
        Arc::clone(&fetcher),
        Request::get(config.probe_url()),
        std::time::Duration::from_secs(config.probe_interval_secs),
        config.network_timeout(),
        shutdown_rx,
    ));

    let context = Arc::new(DaemonContext {
        gateway,
        recorder: ChangeRecorder::new(Arc::clone(&store)),
        store,
        coordinator,
        connectivity,
        export_dir: config.export_dir(),
    });

    let mut ipc_server = IpcServer::new(context, config.socket_path.clone());
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        return Err(e);
    }

    info!("Daemon ready. Waiting for commands...");

    tokio::select! {
        result = ipc_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "IPC server error");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = coordinator_handle.await;
    let _ = probe_handle.await;
    info!(connections = ipc_server.connection_count().await, "Closing IPC socket");
    ipc_server.stop().await?;

    let errors = fetcher.recent_errors();
    if !errors.is_empty() {
        info!(count = errors.len(), health = fetcher.health_status(), "Network errors this session");
        for entry in &errors {
            debug!(timestamp = entry.timestamp, url = %entry.url, error = %entry.error, "Network error");
        }
    }

    info!("Shutdown complete.");
    Ok(())
}
