//! Offline queue store.
//!
//! Durable, ordered staging of work-order mutations that could not reach the
//! server. Items live in the `offline_queue` table (insertion order = `seq`)
//! and a full snapshot is cached in memory so readers never see a partially
//! applied change: every mutation rewrites the row, then re-reads the whole
//! table and bumps the snapshot version that subscribers watch.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::work_order::{CreateWorkOrderInput, UpdateWorkOrderInput};

/// Default storage budget for queued payloads (5 MiB).
pub const DEFAULT_QUEUE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub(crate) const DEFAULT_RETRY_DELAY_MS: i64 = 5_000;
pub(crate) const MAX_RETRY_DELAY_MS: i64 = 300_000;

pub const WORK_ORDER_CREATE: &str = "work_order_create";
pub const WORK_ORDER_UPDATE: &str = "work_order_update";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    /// Only items still in flight are shown optimistically.
    pub fn is_in_flight(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

/// Payload of a queued update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedWorkOrderUpdate {
    pub work_order_id: String,
    pub changes: UpdateWorkOrderInput,
}

/// The queued operation, discriminated by `type` with its `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueOperation {
    WorkOrderCreate(CreateWorkOrderInput),
    WorkOrderUpdate(QueuedWorkOrderUpdate),
}

impl QueueOperation {
    pub fn type_name(&self) -> &'static str {
        match self {
            QueueOperation::WorkOrderCreate(_) => WORK_ORDER_CREATE,
            QueueOperation::WorkOrderUpdate(_) => WORK_ORDER_UPDATE,
        }
    }

    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            QueueOperation::WorkOrderCreate(input) => serde_json::to_string(input),
            QueueOperation::WorkOrderUpdate(update) => serde_json::to_string(update),
        }
    }

    pub fn from_parts(item_type: &str, payload: &str) -> Result<Self, QueueError> {
        match item_type {
            WORK_ORDER_CREATE => Ok(QueueOperation::WorkOrderCreate(serde_json::from_str(
                payload,
            )?)),
            WORK_ORDER_UPDATE => Ok(QueueOperation::WorkOrderUpdate(serde_json::from_str(
                payload,
            )?)),
            other => Err(QueueError::UnknownType(other.to_string())),
        }
    }
}

/// A pending mutation awaiting transmission or retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    #[serde(flatten)]
    pub operation: QueueOperation,
    pub organization_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Fresh `pending` item with a client-generated id. `payload_size_bytes`
    /// is assigned by the store on enqueue.
    pub fn new(
        operation: QueueOperation,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries,
            payload_size_bytes: 0,
            last_error: None,
            next_retry_at: None,
        }
    }

    pub fn item_type(&self) -> &'static str {
        self.operation.type_name()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("offline queue storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("invalid queue payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("offline queue is full: {needed} bytes needed, {available} bytes available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("unknown queue item type: {0}")]
    UnknownType(String),
    #[error("queue item not found: {0}")]
    NotFound(String),
    #[error("offline queue lock poisoned")]
    Lock,
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Queue operations consumed by the mutation service and the merge view.
pub trait OfflineQueue: Send + Sync {
    /// Append an item; returns it with store bookkeeping filled in.
    fn enqueue(&self, item: QueueItem) -> Result<QueueItem, QueueError>;

    /// Current snapshot in insertion order.
    fn queued_items(&self) -> Vec<QueueItem>;

    /// Re-read the backing store and notify subscribers.
    fn refresh(&self) -> Result<(), QueueError>;
}

impl<T: OfflineQueue + ?Sized> OfflineQueue for Arc<T> {
    fn enqueue(&self, item: QueueItem) -> Result<QueueItem, QueueError> {
        (**self).enqueue(item)
    }

    fn queued_items(&self) -> Vec<QueueItem> {
        (**self).queued_items()
    }

    fn refresh(&self) -> Result<(), QueueError> {
        (**self).refresh()
    }
}

// ---------------------------------------------------------------------------
// Retry pacing
// ---------------------------------------------------------------------------

fn deterministic_jitter_ms(seed: i64) -> i64 {
    (seed.abs() % 700) + 50
}

fn schedule_next_retry(now: DateTime<Utc>, delay_ms: i64, seed: i64) -> DateTime<Utc> {
    let bounded = delay_ms.clamp(1_000, MAX_RETRY_DELAY_MS);
    now + ChronoDuration::milliseconds(bounded + deterministic_jitter_ms(seed))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// SQLite-backed store
// ---------------------------------------------------------------------------

const SELECT_COLUMNS: &str = "id, item_type, payload, organization_id, user_id, timestamp,
     status, retry_count, max_retries, payload_size_bytes, last_error, next_retry_at";

type RawRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
);

fn read_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn item_from_raw(raw: RawRow) -> Result<QueueItem, QueueError> {
    let (
        id,
        item_type,
        payload,
        organization_id,
        user_id,
        timestamp,
        status,
        retry_count,
        max_retries,
        payload_size_bytes,
        last_error,
        next_retry_at,
    ) = raw;
    let operation = QueueOperation::from_parts(&item_type, &payload)?;
    Ok(QueueItem {
        id,
        operation,
        organization_id,
        user_id,
        timestamp: parse_ts(&timestamp).unwrap_or_else(Utc::now),
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Pending),
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        payload_size_bytes: payload_size_bytes.max(0) as u64,
        last_error,
        next_retry_at: next_retry_at.as_deref().and_then(parse_ts),
    })
}

fn query_items(
    conn: &rusqlite::Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<QueueItem>, QueueError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM offline_queue {where_clause} ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, read_raw_row)?;

    let mut items = Vec::new();
    for raw in rows {
        let raw = raw?;
        let id = raw.0.clone();
        match item_from_raw(raw) {
            Ok(item) => items.push(item),
            Err(e) => warn!(queue_item_id = %id, error = %e, "Skipping unreadable queue row"),
        }
    }
    Ok(items)
}

/// Offline queue persisted in the local SQLite database.
pub struct SqliteOfflineQueue {
    db: Arc<DbState>,
    quota_bytes: u64,
    snapshot: Mutex<Vec<QueueItem>>,
    version: watch::Sender<u64>,
}

impl SqliteOfflineQueue {
    /// Open the store, reset items stranded in `processing` by a previous
    /// process, and load the initial snapshot.
    pub fn open(db: Arc<DbState>, quota_bytes: u64) -> Result<Self, QueueError> {
        let (version, _) = watch::channel(0);
        let store = Self {
            db,
            quota_bytes,
            snapshot: Mutex::new(Vec::new()),
            version,
        };
        let reset = store.reset_stale_processing()?;
        if reset > 0 {
            info!(count = reset, "Reset stale processing queue items to pending");
        }
        store.refresh()?;
        Ok(store)
    }

    /// Change signal carrying the snapshot version.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, QueueError> {
        self.db.conn.lock().map_err(|_| QueueError::Lock)
    }

    fn expect_row_changed(changed: usize, id: &str) -> Result<(), QueueError> {
        if changed == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Sum of stored payload sizes across every item, failed ones included.
    pub fn total_payload_bytes(&self) -> Result<u64, QueueError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(payload_size_bytes), 0) FROM offline_queue",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    pub fn status_counts(&self) -> QueueCounts {
        let snapshot = self.queued_items();
        let mut counts = QueueCounts::default();
        for item in &snapshot {
            match item.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// `pending` items whose retry time has arrived, oldest first.
    pub fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>, QueueError> {
        let conn = self.conn()?;
        let now = format_ts(now);
        let mut items = query_items(
            &conn,
            "WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?1)",
            &[&now],
        )?;
        items.truncate(limit);
        Ok(items)
    }

    pub fn failed_items(&self) -> Vec<QueueItem> {
        self.queued_items()
            .into_iter()
            .filter(|item| item.status == QueueStatus::Failed)
            .collect()
    }

    /// `pending → processing`.
    pub fn mark_processing(&self, id: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE offline_queue SET status = 'processing'
                 WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            Self::expect_row_changed(changed, id)?;
        }
        self.refresh()
    }

    /// `processing → (removed)` after the server confirmed the write.
    pub fn complete(&self, id: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
            Self::expect_row_changed(changed, id)?;
        }
        debug!(queue_item_id = %id, "Queue item synced and removed");
        self.refresh()
    }

    /// `processing → pending` without consuming a retry (network still down).
    pub fn release(&self, id: &str, error: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE offline_queue SET status = 'pending', last_error = ?2 WHERE id = ?1",
                params![id, error],
            )?;
            Self::expect_row_changed(changed, id)?;
        }
        self.refresh()
    }

    /// Retry-able failure: increments `retry_count` and schedules the next
    /// attempt with exponential backoff, or moves the item to `failed` once
    /// the count exceeds `max_retries`. Returns the resulting status.
    pub fn record_failure(&self, id: &str, error: &str) -> Result<QueueStatus, QueueError> {
        let status = {
            let conn = self.conn()?;
            let row: Option<(i64, i64, i64, i64)> = conn
                .query_row(
                    "SELECT seq, retry_count, max_retries, COALESCE(retry_delay_ms, 5000)
                     FROM offline_queue WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let (seq, retry_count, max_retries, retry_delay_ms) =
                row.ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            let new_count = retry_count + 1;
            let exhausted = new_count > max_retries;
            let status = if exhausted {
                QueueStatus::Failed
            } else {
                QueueStatus::Pending
            };
            let next_delay = (retry_delay_ms.max(DEFAULT_RETRY_DELAY_MS) * 2).min(MAX_RETRY_DELAY_MS);
            let next_retry_at = if exhausted {
                None
            } else {
                Some(format_ts(schedule_next_retry(Utc::now(), next_delay, seq)))
            };
            conn.execute(
                "UPDATE offline_queue
                 SET status = ?1,
                     retry_count = ?2,
                     next_retry_at = ?3,
                     retry_delay_ms = ?4,
                     last_error = ?5
                 WHERE id = ?6",
                params![status.as_str(), new_count, next_retry_at, next_delay, error, id],
            )?;
            status
        };
        if status == QueueStatus::Failed {
            warn!(queue_item_id = %id, error = %error, "Queue item exhausted its retries");
        }
        self.refresh()?;
        Ok(status)
    }

    /// Move an item straight to `failed` (permanent rejection).
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE offline_queue
                 SET status = 'failed', last_error = ?2, next_retry_at = NULL
                 WHERE id = ?1",
                params![id, error],
            )?;
            Self::expect_row_changed(changed, id)?;
        }
        warn!(queue_item_id = %id, error = %error, "Queue item rejected permanently");
        self.refresh()
    }

    /// Re-arm a failed item for another round of attempts.
    pub fn retry_failed(&self, id: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE offline_queue
                 SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                     retry_delay_ms = ?2
                 WHERE id = ?1 AND status = 'failed'",
                params![id, DEFAULT_RETRY_DELAY_MS],
            )?;
            Self::expect_row_changed(changed, id)?;
        }
        info!(queue_item_id = %id, "Failed queue item re-armed");
        self.refresh()
    }

    /// Drop an item regardless of status.
    pub fn discard(&self, id: &str) -> Result<(), QueueError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
            Self::expect_row_changed(changed, id)?;
        }
        info!(queue_item_id = %id, "Queue item discarded");
        self.refresh()
    }

    /// Items stuck in `processing` (process exited mid-sync) go back to
    /// `pending`. Replays are safe because creates carry an idempotency key.
    pub fn reset_stale_processing(&self) -> Result<usize, QueueError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE offline_queue SET status = 'pending' WHERE status = 'processing'",
            [],
        )?;
        Ok(changed)
    }
}

impl OfflineQueue for SqliteOfflineQueue {
    fn enqueue(&self, mut item: QueueItem) -> Result<QueueItem, QueueError> {
        let payload = item.operation.payload_json()?;
        let size = payload.len() as u64;
        item.payload_size_bytes = size;

        {
            let conn = self.conn()?;
            let used: i64 = conn.query_row(
                "SELECT COALESCE(SUM(payload_size_bytes), 0) FROM offline_queue",
                [],
                |row| row.get(0),
            )?;
            let available = self.quota_bytes.saturating_sub(used.max(0) as u64);
            if size > available {
                return Err(QueueError::QuotaExceeded {
                    needed: size,
                    available,
                });
            }

            conn.execute(
                "INSERT INTO offline_queue (
                    id, item_type, payload, organization_id, user_id, timestamp,
                    status, retry_count, max_retries, payload_size_bytes
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    &item.id,
                    item.item_type(),
                    &payload,
                    &item.organization_id,
                    &item.user_id,
                    format_ts(item.timestamp),
                    item.status.as_str(),
                    item.retry_count,
                    item.max_retries,
                    size as i64,
                ],
            )?;
        }

        info!(
            queue_item_id = %item.id,
            item_type = item.item_type(),
            payload_size_bytes = size,
            "Mutation queued for offline sync"
        );
        self.refresh()?;
        Ok(item)
    }

    fn queued_items(&self) -> Vec<QueueItem> {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => {
                warn!("offline queue snapshot lock poisoned");
                Vec::new()
            }
        }
    }

    fn refresh(&self) -> Result<(), QueueError> {
        // Lock order: connection, then snapshot. The connection stays held
        // until the snapshot is stored so snapshots publish in write order.
        let conn = self.conn()?;
        let items = query_items(&conn, "", &[])?;
        {
            let mut guard = self.snapshot.lock().map_err(|_| QueueError::Lock)?;
            *guard = items;
        }
        self.version.send_modify(|v| *v += 1);
        drop(conn);
        Ok(())
    }
}
