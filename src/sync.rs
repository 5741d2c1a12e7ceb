//! Background replay of the offline queue.
//!
//! A tokio task wakes every `interval_secs`, probes the server, and drains
//! due queue items in FIFO order. Outcome handling:
//!
//! - server confirmed        → item removed
//! - server unreachable      → item back to `pending`, cycle stops, no retry consumed
//! - permanent rejection     → item `failed`
//! - anything else           → `retry_count` + 1 with backoff, `failed` once exhausted
//!
//! Creates are replayed with the queue item id as idempotency key, so a
//! write whose response was lost is not duplicated on the next attempt.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::queue::{QueueError, QueueItem, QueueOperation, QueueStatus, SqliteOfflineQueue};
use crate::service::WorkOrderBackend;
use crate::work_order::MutationContext;

/// Items replayed per cycle.
const SYNC_BATCH_SIZE: usize = 25;

#[derive(Debug, Default)]
pub struct SyncState {
    pub is_running: Arc<AtomicBool>,
    pub is_online: Arc<AtomicBool>,
    pub last_sync: Arc<Mutex<Option<String>>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_synced(&self) {
        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(Utc::now().to_rfc3339());
        }
    }
}

/// Per-cycle tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub synced: usize,
    pub retried: usize,
    pub failed: usize,
    /// Due items left untouched because the server went away mid-cycle.
    pub deferred: usize,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.synced + self.retried + self.failed
    }
}

async fn replay<B: WorkOrderBackend>(backend: &B, item: &QueueItem) -> Result<(), ApiError> {
    let ctx = MutationContext::new(&item.organization_id, &item.user_id)
        .with_idempotency_key(&item.id);
    match &item.operation {
        QueueOperation::WorkOrderCreate(input) => {
            backend.create_work_order(input, &ctx).await.map(|_| ())
        }
        QueueOperation::WorkOrderUpdate(update) => backend
            .update_work_order(&update.work_order_id, &update.changes, &ctx)
            .await
            .map(|_| ()),
    }
}

/// Replay due queue items once.
pub async fn run_sync_cycle<B: WorkOrderBackend>(
    queue: &SqliteOfflineQueue,
    backend: &B,
) -> Result<SyncReport, QueueError> {
    let due = queue.due_items(Utc::now(), SYNC_BATCH_SIZE)?;
    let mut report = SyncReport::default();
    if due.is_empty() {
        return Ok(report);
    }
    debug!(count = due.len(), "Replaying offline queue");

    let total = due.len();
    for (index, item) in due.into_iter().enumerate() {
        queue.mark_processing(&item.id)?;

        match replay(backend, &item).await {
            Ok(()) => {
                queue.complete(&item.id)?;
                report.synced += 1;
                info!(
                    queue_item_id = %item.id,
                    item_type = item.item_type(),
                    "Queued mutation synced"
                );
            }
            Err(e) if e.is_connectivity() => {
                queue.release(&item.id, &e.to_string())?;
                report.deferred = total - index;
                info!(error = %e, deferred = report.deferred, "Server unreachable, sync deferred");
                break;
            }
            Err(e) if e.is_permanent() => {
                queue.mark_failed(&item.id, &e.to_string())?;
                report.failed += 1;
            }
            Err(e) => match queue.record_failure(&item.id, &e.to_string())? {
                QueueStatus::Failed => report.failed += 1,
                _ => {
                    report.retried += 1;
                    warn!(queue_item_id = %item.id, error = %e, "Queued mutation failed, will retry");
                }
            },
        }
    }

    Ok(report)
}

/// Status snapshot for the UI.
pub fn get_sync_status(queue: &SqliteOfflineQueue, sync_state: &SyncState) -> Value {
    let counts = queue.status_counts();
    let last_sync = sync_state
        .last_sync
        .lock()
        .ok()
        .and_then(|guard| guard.clone());
    let queue_bytes = queue.total_payload_bytes().unwrap_or(0);

    json!({
        "isRunning": sync_state.is_running.load(Ordering::SeqCst),
        "isOnline": sync_state.is_online.load(Ordering::SeqCst),
        "lastSync": last_sync,
        "pendingItems": counts.pending,
        "processingItems": counts.processing,
        "failedItems": counts.failed,
        "queueBytes": queue_bytes,
        "quotaBytes": queue.quota_bytes(),
    })
}

// ---------------------------------------------------------------------------
// Background sync loop
// ---------------------------------------------------------------------------

/// Spawn the sync loop on the current tokio runtime.
pub fn start_sync_loop<B>(
    queue: Arc<SqliteOfflineQueue>,
    backend: Arc<B>,
    sync_state: Arc<SyncState>,
    interval_secs: u64,
) -> JoinHandle<()>
where
    B: WorkOrderBackend + 'static,
{
    sync_state.is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Sync loop started (interval: {interval_secs}s)");
        let mut previous_online: Option<bool> = None;

        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs.max(1))).await;

            if !sync_state.is_running.load(Ordering::SeqCst) {
                info!("Sync loop stopped");
                break;
            }

            let online = backend.is_reachable().await;
            sync_state.is_online.store(online, Ordering::SeqCst);

            if !online {
                if previous_online != Some(false) {
                    info!("Network offline; deferring sync and keeping queue pending");
                }
                previous_online = Some(false);
                continue;
            }
            if previous_online == Some(false) {
                info!("Network restored; resuming queued sync");
            }
            previous_online = Some(true);

            match run_sync_cycle(&queue, &*backend).await {
                Ok(report) => {
                    if report.attempted() > 0 {
                        info!(
                            synced = report.synced,
                            retried = report.retried,
                            failed = report.failed,
                            "Sync cycle complete"
                        );
                    }
                    sync_state.mark_synced();
                }
                Err(e) => warn!("Sync cycle failed: {e}"),
            }
        }
    })
}

/// Ask the loop to exit after its current sleep.
pub fn stop_sync_loop(sync_state: &SyncState) {
    sync_state.is_running.store(false, Ordering::SeqCst);
}

/// Run one cycle right now, outside the loop's schedule.
pub async fn force_sync<B: WorkOrderBackend>(
    queue: &SqliteOfflineQueue,
    backend: &B,
    sync_state: &SyncState,
) -> Result<SyncReport, QueueError> {
    let online = backend.is_reachable().await;
    sync_state.is_online.store(online, Ordering::SeqCst);
    if !online {
        let deferred = queue.due_items(Utc::now(), SYNC_BATCH_SIZE)?.len();
        info!(deferred, "Force sync skipped, server unreachable");
        return Ok(SyncReport {
            deferred,
            ..Default::default()
        });
    }

    let report = run_sync_cycle(queue, backend).await?;
    info!(synced = report.synced, "Force sync complete");
    if report.deferred > 0 {
        sync_state.is_online.store(false, Ordering::SeqCst);
    }
    sync_state.mark_synced();
    Ok(report)
}
