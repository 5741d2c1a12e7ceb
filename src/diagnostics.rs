//! Diagnostics: about info, queue health, JSON export, and log housekeeping.

use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::{self, DbState};
use crate::queue::SqliteOfflineQueue;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Rolling log file prefix.
pub const LOG_FILE_PREFIX: &str = "fleet-offline";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Queue health
// ---------------------------------------------------------------------------

/// Collects local store and queue health.
pub fn get_system_health(db: &DbState, queue: &SqliteOfflineQueue) -> Result<Value, String> {
    // Queue accessors take the connection lock themselves, so read them first.
    let counts = queue.status_counts();
    let queue_bytes = queue.total_payload_bytes().map_err(|e| e.to_string())?;

    let (schema_version, recent_errors) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        (db::schema_version(&conn), get_recent_queue_errors(&conn, 20))
    };
    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "queue": {
            "pending": counts.pending,
            "processing": counts.processing,
            "failed": counts.failed,
            "payloadBytes": queue_bytes,
            "quotaBytes": queue.quota_bytes(),
        },
        "recentErrors": recent_errors,
        "dbSizeBytes": db_size,
    }))
}

fn get_recent_queue_errors(conn: &rusqlite::Connection, limit: i64) -> Vec<Value> {
    let mut errors = Vec::new();
    if let Ok(mut stmt) = conn.prepare(
        "SELECT id, item_type, status, last_error, retry_count, timestamp
         FROM offline_queue
         WHERE last_error IS NOT NULL AND last_error != ''
         ORDER BY seq DESC LIMIT ?1",
    ) {
        if let Ok(rows) = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "itemType": row.get::<_, String>(1)?,
                "status": row.get::<_, String>(2)?,
                "lastError": row.get::<_, String>(3)?,
                "retryCount": row.get::<_, i64>(4)?,
                "timestamp": row.get::<_, String>(5)?,
            }))
        }) {
            for row in rows.flatten() {
                errors.push(row);
            }
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write about info and queue health as one redacted JSON file. Returns the
/// file path.
pub fn export_diagnostics(
    db: &DbState,
    queue: &SqliteOfflineQueue,
    output_dir: &Path,
) -> Result<PathBuf, String> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = output_dir.join(format!("fleet-offline-diagnostics-{timestamp}.json"));

    let report = redact_sensitive_fields(json!({
        "about": get_about_info(),
        "health": get_system_health(db, queue)?,
    }));
    let body = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    fs::write(&path, body).map_err(|e| format!("Failed to write diagnostics: {e}"))?;
    Ok(path)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["apikey", "anon_key", "anonkey", "secret", "password", "token", "authorization"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Platform log directory.
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("fleet-offline").join("logs")
}

/// Keep only the most recent `MAX_LOG_FILES` log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
            if path.is_file() && is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OfflineQueue, QueueItem, QueueOperation, DEFAULT_QUEUE_QUOTA_BYTES};
    use crate::work_order::CreateWorkOrderInput;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{tag}_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_log_dir_is_stable() {
        let d1 = get_log_dir();
        assert_eq!(d1, get_log_dir());
        assert!(d1.to_string_lossy().contains("fleet-offline"));
    }

    #[test]
    fn test_health_reports_queue_state() {
        let dir = temp_dir("diag_health");
        let db_state = Arc::new(db::init(&dir).unwrap());
        let queue = SqliteOfflineQueue::open(db_state.clone(), DEFAULT_QUEUE_QUOTA_BYTES).unwrap();
        let item = queue
            .enqueue(QueueItem::new(
                QueueOperation::WorkOrderCreate(CreateWorkOrderInput {
                    title: "Brake check".into(),
                    ..Default::default()
                }),
                "org-1",
                "user-1",
                5,
            ))
            .unwrap();
        queue.mark_processing(&item.id).unwrap();
        queue.mark_failed(&item.id, "HTTP 422: bad payload").unwrap();

        let health = get_system_health(&db_state, &queue).unwrap();
        assert_eq!(health["queue"]["failed"], 1);
        assert_eq!(health["recentErrors"][0]["id"], item.id.as_str());
        assert!(health["dbSizeBytes"].is_u64());

        let path = export_diagnostics(&db_state, &queue, &dir).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written["about"]["version"].is_string());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_redaction_recurses() {
        let redacted = redact_sensitive_fields(json!({
            "access_token": "jwt",
            "nested": { "anonKey": "k", "status": "ok" },
            "items": [{ "password": "1234" }],
        }));
        assert_eq!(redacted["access_token"], "[REDACTED]");
        assert_eq!(redacted["nested"]["anonKey"], "[REDACTED]");
        assert_eq!(redacted["nested"]["status"], "ok");
        assert_eq!(redacted["items"][0]["password"], "[REDACTED]");
    }

    #[test]
    fn test_prune_keeps_newest_logs_only() {
        let dir = temp_dir("diag_prune");
        for n in 0..(MAX_LOG_FILES + 3) {
            fs::write(dir.join(format!("{LOG_FILE_PREFIX}.2026-01-{n:02}")), "x").unwrap();
        }
        fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        prune_old_logs(&dir);

        let remaining: Vec<_> = fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES + 1);
        assert!(dir.join("unrelated.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
