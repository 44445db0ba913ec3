//! IPC protocol definitions
//!
//! Newline-delimited JSON exchanged with dashboard clients over a Unix
//! domain socket. Commands are tagged in SCREAMING_SNAKE_CASE, responses in
//! camelCase.

use serde::{Deserialize, Serialize};

use crate::backup::{Backup, ChangeLogEntry, NewChangeLog, StorageStats};
use crate::net::{Request, Response as HttpResponse};
use crate::sync::CoordinatorState;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Queue a retention sweep; answered before the sweep runs
    CleanupBackups,
    /// Get daemon status
    GetStatus,
    GetStorageStats,
    /// Append a change-log entry
    #[serde(rename_all = "camelCase")]
    AddChangeLog { entry: NewChangeLog },
    /// List change-log entries, newest first
    #[serde(rename_all = "camelCase")]
    ListChangeLogs {
        #[serde(default)]
        limit: Option<usize>,
    },
    ListBackups,
    #[serde(rename_all = "camelCase")]
    CreateBackup { repositories: Vec<String> },
    /// Write a backup blob to the export directory
    #[serde(rename_all = "camelCase")]
    DownloadBackup { backup_id: String },
    /// Write recent change logs to the export directory
    #[serde(rename_all = "camelCase")]
    ExportChangeLogs {
        #[serde(default)]
        days: Option<u32>,
    },
    /// User-triggered retention sweep
    ClearOldData,
    /// Report connectivity observed by the client
    #[serde(rename_all = "camelCase")]
    SetOnline { online: bool },
    /// Route a request through the cache gateway
    #[serde(rename_all = "camelCase")]
    Fetch { request: Request },
}

/// Responses sent from the daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Command queued; the work happens later
    #[serde(rename_all = "camelCase")]
    Accepted { message: String },
    #[serde(rename_all = "camelCase")]
    Success { message: Option<String> },
    #[serde(rename_all = "camelCase")]
    Error { error: String },
    /// Status response with daemon state
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        /// Whether the gateway is active
        healthy: bool,
        online: bool,
        lifecycle: String,
        coordinator: CoordinatorState,
        app_shell_entries: usize,
        backup_entries: usize,
        cache_hit_rate: f64,
    },
    #[serde(rename_all = "camelCase")]
    StorageStats {
        stats: StorageStats,
        near_quota: bool,
    },
    #[serde(rename_all = "camelCase")]
    ChangeLogs { logs: Vec<ChangeLogEntry> },
    #[serde(rename_all = "camelCase")]
    Backups { backups: Vec<Backup> },
    #[serde(rename_all = "camelCase")]
    BackupCreated { backup_id: String },
    /// An export file was written
    #[serde(rename_all = "camelCase")]
    Exported { path: String },
    #[serde(rename_all = "camelCase")]
    Fetched { response: HttpResponse },
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::ActionKind;

    #[test]
    fn test_parse_cleanup_backups_command() {
        let cmd = parse_command(br#"{"type":"CLEANUP_BACKUPS"}"#).unwrap();
        assert!(matches!(cmd, Command::CleanupBackups));
    }

    #[test]
    fn test_parse_add_change_log_command() {
        let json = r#"{"type":"ADD_CHANGE_LOG","entry":{"action":"auto-fix","repository":"acme/api","details":"Enabled branch protection"}}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::AddChangeLog { entry } => {
                assert_eq!(entry.action, ActionKind::AutoFix);
                assert_eq!(entry.repository.as_deref(), Some("acme/api"));
                assert!(entry.after_state.is_none());
            }
            other => panic!("Expected AddChangeLog command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_optional_fields() {
        match parse_command(br#"{"type":"LIST_CHANGE_LOGS"}"#).unwrap() {
            Command::ListChangeLogs { limit } => assert_eq!(limit, None),
            other => panic!("Expected ListChangeLogs command, got {:?}", other),
        }

        match parse_command(br#"{"type":"DOWNLOAD_BACKUP","backupId":"b-1"}"#).unwrap() {
            Command::DownloadBackup { backup_id } => assert_eq!(backup_id, "b-1"),
            other => panic!("Expected DownloadBackup command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fetch_command() {
        let json = r#"{"type":"FETCH","request":{"method":"POST","url":"http://localhost:8080/api/backup/run","body":"e30="}}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::Fetch { request } => {
                assert_eq!(request.method, "POST");
                assert_eq!(request.body, b"{}");
            }
            other => panic!("Expected Fetch command, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_unknown_command() {
        assert!(parse_command(br#"{"type":"cleanupBackups"}"#).is_err());
        assert!(parse_command(b"not json").is_err());
    }

    #[test]
    fn test_serialize_responses() {
        let json = serialize_response(&Response::Accepted {
            message: "Cleanup scheduled".to_string(),
        })
        .unwrap();
        assert!(json.ends_with(b"\n"));
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["type"], "accepted");

        let json = serialize_response(&Response::BackupCreated {
            backup_id: "b-1".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["type"], "backupCreated");
        assert_eq!(value["backupId"], "b-1");
    }
}
