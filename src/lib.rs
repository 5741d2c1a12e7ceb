//! Fleet Offline - offline work-order support for the fleet maintenance client
//!
//! Work order mutations go to the hosted database when it is reachable and
//! land in a local SQLite queue when it is not. A background loop replays the
//! queue once the connection returns, and the merge view overlays queued
//! creates on the server list so the UI shows them immediately.

use anyhow::{anyhow, Context};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod equipment;
pub mod merge;
pub mod queue;
pub mod service;
pub mod storage;
pub mod sync;
pub mod work_order;

#[cfg(test)]
mod test_support;

use api::{ApiClient, ApiError, ConnectionSettings};
use config::SyncSettings;
use db::DbState;
use merge::MergedWorkOrder;
use queue::{QueueError, SqliteOfflineQueue};
use service::OfflineAwareWorkOrderService;
use sync::{SyncReport, SyncState};
use work_order::WorkOrder;

/// The mutation service as wired by [`OfflineRuntime`].
pub type WorkOrderService = OfflineAwareWorkOrderService<Arc<ApiClient>, Arc<SqliteOfflineQueue>>;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install console + daily rolling file logging.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// for as long as logs should be flushed to disk.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleet_offline_lib=debug"));

    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))?;

    info!("Starting Fleet Offline v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// Local store, queue, client, mutation service and sync loop, wired together.
///
/// Must be started from inside a tokio runtime; the sync loop is spawned on it.
pub struct OfflineRuntime {
    db: Arc<DbState>,
    queue: Arc<SqliteOfflineQueue>,
    client: Arc<ApiClient>,
    service: WorkOrderService,
    sync_state: Arc<SyncState>,
    settings: SyncSettings,
    sync_task: JoinHandle<()>,
}

fn open_local(data_dir: &Path) -> anyhow::Result<(Arc<DbState>, SyncSettings)> {
    let db = Arc::new(db::init(data_dir).map_err(anyhow::Error::msg)?);
    let settings = {
        let conn = db
            .conn
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))?;
        SyncSettings::load(&conn)
    };
    Ok((db, settings))
}

impl OfflineRuntime {
    /// Start against explicit connection settings.
    pub fn start(data_dir: &Path, connection: ConnectionSettings) -> anyhow::Result<Self> {
        tokio::runtime::Handle::try_current()
            .context("OfflineRuntime must be started inside a tokio runtime")?;
        let (db, settings) = open_local(data_dir)?;
        Self::wire(db, settings, connection)
    }

    /// Start against the credentials in the OS credential store.
    pub fn start_from_credentials(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::runtime::Handle::try_current()
            .context("OfflineRuntime must be started inside a tokio runtime")?;
        let (db, settings) = open_local(data_dir)?;
        let connection = storage::connection_settings(settings.request_timeout())
            .context("No server credentials stored; sign in first")?;
        Self::wire(db, settings, connection)
    }

    fn wire(
        db: Arc<DbState>,
        settings: SyncSettings,
        connection: ConnectionSettings,
    ) -> anyhow::Result<Self> {
        let queue = Arc::new(SqliteOfflineQueue::open(
            db.clone(),
            settings.queue_quota_bytes,
        )?);
        let client = Arc::new(ApiClient::new(&connection)?);
        let service = OfflineAwareWorkOrderService::new(client.clone(), Some(queue.clone()))
            .with_max_retries(settings.max_retries);

        let sync_state = Arc::new(SyncState::new());
        let sync_task = sync::start_sync_loop(
            queue.clone(),
            client.clone(),
            sync_state.clone(),
            settings.interval_secs,
        );

        info!(
            api_url = %client.base_url(),
            interval_secs = settings.interval_secs,
            max_retries = settings.max_retries,
            "Offline runtime started"
        );

        Ok(Self {
            db,
            queue,
            client,
            service,
            sync_state,
            settings,
            sync_task,
        })
    }

    pub fn service(&self) -> &WorkOrderService {
        &self.service
    }

    pub fn queue(&self) -> &Arc<SqliteOfflineQueue> {
        &self.queue
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Fires whenever the queue snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.queue.subscribe()
    }

    /// Merge the organization's queued items onto `server`, resolving
    /// equipment names from the local cache.
    pub fn merged_view(&self, server: &[WorkOrder], organization_id: &str) -> Vec<MergedWorkOrder> {
        let cache = equipment::load_cache(&self.db, organization_id);
        self.service.merged_work_orders(server, organization_id, Some(&cache))
    }

    /// Fetch the server list and merge the queue onto it.
    pub async fn load_work_orders(
        &self,
        organization_id: &str,
    ) -> Result<Vec<MergedWorkOrder>, ApiError> {
        let server = self.client.list_work_orders(organization_id).await?;
        Ok(self.merged_view(&server, organization_id))
    }

    /// Pull equipment names into the local cache.
    pub async fn refresh_equipment_cache(&self, organization_id: &str) -> anyhow::Result<usize> {
        let equipment = self.client.list_equipment(organization_id).await?;
        equipment::store_cache(&self.db, organization_id, &equipment).map_err(anyhow::Error::msg)
    }

    pub async fn force_sync(&self) -> Result<SyncReport, QueueError> {
        sync::force_sync(&self.queue, &*self.client, &self.sync_state).await
    }

    pub fn sync_status(&self) -> Value {
        sync::get_sync_status(&self.queue, &self.sync_state)
    }

    pub fn system_health(&self) -> Result<Value, String> {
        diagnostics::get_system_health(&self.db, &self.queue)
    }

    /// Stop the sync loop. Queued items stay on disk for the next start.
    pub fn shutdown(self) {
        sync::stop_sync_loop(&self.sync_state);
        self.sync_task.abort();
        info!("Offline runtime stopped");
    }
}
