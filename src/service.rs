//! Offline-aware work order mutations.
//!
//! Every create/update is attempted against the server first. A failure that
//! never got a verdict from the server (unreachable, timeout) is staged in the
//! offline queue and reported as `queued_offline`; any other failure is
//! returned to the caller untouched, since replaying a rejected write would
//! only fail again. Secondary writes (equipment hour meter, PM record) run
//! only after a confirmed primary write and never fail the mutation.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiError};
use crate::equipment::EquipmentNameCache;
use crate::merge::{merge_offline_work_orders, MergedWorkOrder, OFFLINE_ID_PREFIX};
use crate::queue::{
    OfflineQueue, QueueError, QueueItem, QueueOperation, QueueStatus, QueuedWorkOrderUpdate,
    DEFAULT_MAX_RETRIES,
};
use crate::work_order::{CreateWorkOrderInput, MutationContext, UpdateWorkOrderInput, WorkOrder};

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// Server operations the service and the sync loop depend on.
#[async_trait]
pub trait WorkOrderBackend: Send + Sync {
    async fn create_work_order(
        &self,
        input: &CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError>;

    async fn update_work_order(
        &self,
        work_order_id: &str,
        changes: &UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError>;

    async fn update_equipment_working_hours(
        &self,
        equipment_id: &str,
        hours: f64,
        work_order_id: Option<&str>,
    ) -> Result<(), ApiError>;

    async fn create_pm_record(
        &self,
        work_order: &WorkOrder,
        template_id: Option<&str>,
        ctx: &MutationContext,
    ) -> Result<(), ApiError>;

    /// Cheap reachability probe used by the sync loop.
    async fn is_reachable(&self) -> bool;
}

#[async_trait]
impl WorkOrderBackend for ApiClient {
    async fn create_work_order(
        &self,
        input: &CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        self.insert_work_order(input, ctx).await
    }

    async fn update_work_order(
        &self,
        work_order_id: &str,
        changes: &UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        self.patch_work_order(work_order_id, changes, ctx).await
    }

    async fn update_equipment_working_hours(
        &self,
        equipment_id: &str,
        hours: f64,
        work_order_id: Option<&str>,
    ) -> Result<(), ApiError> {
        self.rpc_update_equipment_working_hours(equipment_id, hours, work_order_id)
            .await
    }

    async fn create_pm_record(
        &self,
        work_order: &WorkOrder,
        template_id: Option<&str>,
        ctx: &MutationContext,
    ) -> Result<(), ApiError> {
        self.insert_pm_record(work_order, template_id, ctx).await
    }

    async fn is_reachable(&self) -> bool {
        self.health_check().await.success
    }
}

#[async_trait]
impl<T: WorkOrderBackend + ?Sized> WorkOrderBackend for Arc<T> {
    async fn create_work_order(
        &self,
        input: &CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        (**self).create_work_order(input, ctx).await
    }

    async fn update_work_order(
        &self,
        work_order_id: &str,
        changes: &UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        (**self).update_work_order(work_order_id, changes, ctx).await
    }

    async fn update_equipment_working_hours(
        &self,
        equipment_id: &str,
        hours: f64,
        work_order_id: Option<&str>,
    ) -> Result<(), ApiError> {
        (**self)
            .update_equipment_working_hours(equipment_id, hours, work_order_id)
            .await
    }

    async fn create_pm_record(
        &self,
        work_order: &WorkOrder,
        template_id: Option<&str>,
        ctx: &MutationContext,
    ) -> Result<(), ApiError> {
        (**self).create_pm_record(work_order, template_id, ctx).await
    }

    async fn is_reachable(&self) -> bool {
        (**self).is_reachable().await
    }
}

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// User-facing feedback attached to a successful (or queued) mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Notice {
    SavedOffline(String),
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    /// Server record; `None` when the mutation was queued.
    pub record: Option<WorkOrder>,
    pub queued_offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    pub notices: Vec<Notice>,
}

impl MutationOutcome {
    fn confirmed(record: WorkOrder, notices: Vec<Notice>) -> Self {
        Self {
            record: Some(record),
            queued_offline: false,
            queue_item_id: None,
            notices,
        }
    }

    fn queued(item: &QueueItem, message: &str) -> Self {
        Self {
            record: None,
            queued_offline: true,
            queue_item_id: Some(item.id.clone()),
            notices: vec![Notice::SavedOffline(message.to_string())],
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.notices.iter().filter_map(|n| match n {
            Notice::Warning(msg) => Some(msg.as_str()),
            Notice::SavedOffline(_) => None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Could not save offline: {0}")]
    Queue(#[from] QueueError),
}

fn validate_create(input: &CreateWorkOrderInput) -> Result<(), ServiceError> {
    if input.title.trim().is_empty() {
        return Err(ServiceError::Validation("Work order title is required".into()));
    }
    validate_hours("Estimated hours", input.estimated_hours)?;
    validate_hours("Equipment working hours", input.equipment_working_hours)?;
    Ok(())
}

fn validate_update(changes: &UpdateWorkOrderInput) -> Result<(), ServiceError> {
    if changes.is_empty() {
        return Err(ServiceError::Validation("No changes to save".into()));
    }
    if matches!(changes.title.as_deref(), Some(t) if t.trim().is_empty()) {
        return Err(ServiceError::Validation("Work order title is required".into()));
    }
    validate_hours("Estimated hours", changes.estimated_hours)?;
    validate_hours("Equipment working hours", changes.equipment_working_hours)?;
    Ok(())
}

fn validate_hours(label: &str, hours: Option<f64>) -> Result<(), ServiceError> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(ServiceError::Validation(format!(
            "{label} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct OfflineAwareWorkOrderService<B, Q> {
    backend: B,
    queue: Option<Q>,
    max_retries: u32,
}

impl<B: WorkOrderBackend, Q: OfflineQueue> OfflineAwareWorkOrderService<B, Q> {
    /// `queue` is `None` when offline support is not wired up; connectivity
    /// failures then surface as errors like any other.
    pub fn new(backend: B, queue: Option<Q>) -> Self {
        Self {
            backend,
            queue,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn queue(&self) -> Option<&Q> {
        self.queue.as_ref()
    }

    fn notify_refresh(&self) {
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.refresh() {
                warn!(error = %e, "Offline queue refresh after server write failed");
            }
        }
    }

    /// Stage `operation` under `queue_item_id`, which doubles as the
    /// idempotency key on replay.
    fn stage(
        &self,
        queue: &Q,
        operation: QueueOperation,
        ctx: &MutationContext,
        queue_item_id: String,
    ) -> Result<QueueItem, ServiceError> {
        let mut item = QueueItem::new(
            operation,
            &ctx.organization_id,
            &ctx.user_id,
            self.max_retries,
        );
        item.id = queue_item_id;
        Ok(queue.enqueue(item)?)
    }

    fn enqueue_offline(
        &self,
        operation: QueueOperation,
        ctx: &MutationContext,
        queue_item_id: String,
        cause: ApiError,
    ) -> Result<MutationOutcome, ServiceError> {
        let Some(queue) = &self.queue else {
            return Err(cause.into());
        };
        let item = self.stage(queue, operation, ctx, queue_item_id)?;
        info!(
            queue_item_id = %item.id,
            item_type = item.item_type(),
            cause = %cause,
            "Server unreachable, mutation saved offline"
        );
        Ok(MutationOutcome::queued(
            &item,
            "You're offline. The work order was saved and will sync when the connection returns.",
        ))
    }

    /// Queue item id of a create that has not reached the server yet.
    fn pending_create_id<'a>(&self, work_order_id: &'a str) -> Option<&'a str> {
        let queue_item_id = work_order_id.strip_prefix(OFFLINE_ID_PREFIX)?;
        let queue = self.queue.as_ref()?;
        queue
            .queued_items()
            .iter()
            .any(|item| {
                item.id == queue_item_id
                    && item.status != QueueStatus::Failed
                    && matches!(item.operation, QueueOperation::WorkOrderCreate(_))
            })
            .then_some(queue_item_id)
    }

    /// Record a new hour-meter reading. Failures become a warning.
    async fn apply_working_hours(
        &self,
        record: &WorkOrder,
        hours: Option<f64>,
        notices: &mut Vec<Notice>,
    ) {
        let (Some(equipment_id), Some(hours)) = (record.equipment_id.as_deref(), hours) else {
            return;
        };
        if let Err(e) = self
            .backend
            .update_equipment_working_hours(equipment_id, hours, Some(&record.id))
            .await
        {
            warn!(
                work_order_id = %record.id,
                equipment_id = %equipment_id,
                error = %e,
                "Equipment working hours update failed"
            );
            notices.push(Notice::Warning(format!(
                "Work order saved, but equipment working hours could not be updated: {e}"
            )));
        }
    }

    /// Create a work order, or queue it when the server is unreachable.
    pub async fn create_work_order(
        &self,
        input: CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, ServiceError> {
        validate_create(&input)?;

        // The same id keys the direct write and any replay, so a write whose
        // response was lost is not inserted twice.
        let queue_item_id = ctx
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let attempt_ctx = ctx.clone().with_idempotency_key(&queue_item_id);

        match self.backend.create_work_order(&input, &attempt_ctx).await {
            Ok(record) => {
                self.notify_refresh();
                let mut notices = Vec::new();
                self.apply_working_hours(&record, input.equipment_working_hours, &mut notices)
                    .await;
                if input.has_pm {
                    if let Err(e) = self
                        .backend
                        .create_pm_record(&record, input.pm_template_id.as_deref(), ctx)
                        .await
                    {
                        warn!(work_order_id = %record.id, error = %e, "PM record creation failed");
                        notices.push(Notice::Warning(format!(
                            "Work order created, but the PM checklist could not be created: {e}"
                        )));
                    }
                }
                Ok(MutationOutcome::confirmed(record, notices))
            }
            Err(e) if e.is_connectivity() => self.enqueue_offline(
                QueueOperation::WorkOrderCreate(input),
                ctx,
                queue_item_id,
                e,
            ),
            Err(e) => {
                warn!(error = %e, "Work order create rejected");
                Err(e.into())
            }
        }
    }

    /// Update a work order, or queue the change when the server is unreachable.
    pub async fn update_work_order(
        &self,
        work_order_id: &str,
        changes: UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, ServiceError> {
        validate_update(&changes)?;

        // Synthetic rows carry `offline-<queue item id>`; the create replays
        // with that id as the server id.
        if let Some(created_id) = self.pending_create_id(work_order_id) {
            if let Some(queue) = &self.queue {
                let item = self.stage(
                    queue,
                    QueueOperation::WorkOrderUpdate(QueuedWorkOrderUpdate {
                        work_order_id: created_id.to_string(),
                        changes,
                    }),
                    ctx,
                    Uuid::new_v4().to_string(),
                )?;
                info!(
                    queue_item_id = %item.id,
                    work_order_id = %created_id,
                    "Update queued behind unsynced create"
                );
                return Ok(MutationOutcome::queued(
                    &item,
                    "The change was saved and will sync after the work order is uploaded.",
                ));
            }
        }
        let work_order_id = work_order_id
            .strip_prefix(OFFLINE_ID_PREFIX)
            .unwrap_or(work_order_id);

        match self
            .backend
            .update_work_order(work_order_id, &changes, ctx)
            .await
        {
            Ok(record) => {
                self.notify_refresh();
                let mut notices = Vec::new();
                self.apply_working_hours(&record, changes.equipment_working_hours, &mut notices)
                    .await;
                Ok(MutationOutcome::confirmed(record, notices))
            }
            Err(e) if e.is_connectivity() => self.enqueue_offline(
                QueueOperation::WorkOrderUpdate(QueuedWorkOrderUpdate {
                    work_order_id: work_order_id.to_string(),
                    changes,
                }),
                ctx,
                Uuid::new_v4().to_string(),
                e,
            ),
            Err(e) => {
                warn!(work_order_id = %work_order_id, error = %e, "Work order update rejected");
                Err(e.into())
            }
        }
    }

    /// Merge one organization's queued items onto a server list.
    pub fn merged_work_orders(
        &self,
        server: &[WorkOrder],
        organization_id: &str,
        equipment: Option<&EquipmentNameCache>,
    ) -> Vec<MergedWorkOrder> {
        match &self.queue {
            Some(queue) => {
                let snapshot: Vec<QueueItem> = queue
                    .queued_items()
                    .into_iter()
                    .filter(|item| item.organization_id == organization_id)
                    .collect();
                merge_offline_work_orders(server, Some(&snapshot), equipment)
            }
            None => merge_offline_work_orders(server, None, equipment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::queue::{SqliteOfflineQueue, DEFAULT_QUEUE_QUOTA_BYTES};
    use crate::sync::run_sync_cycle;
    use crate::test_support::{BackendCall, FakeBackend};

    type TestService = OfflineAwareWorkOrderService<Arc<FakeBackend>, Arc<SqliteOfflineQueue>>;

    fn service_with(backend: FakeBackend) -> (TestService, Arc<FakeBackend>, Arc<SqliteOfflineQueue>) {
        let db = Arc::new(db::open_in_memory().unwrap());
        let queue = Arc::new(SqliteOfflineQueue::open(db, DEFAULT_QUEUE_QUOTA_BYTES).unwrap());
        let backend = Arc::new(backend);
        let service = OfflineAwareWorkOrderService::new(backend.clone(), Some(queue.clone()));
        (service, backend, queue)
    }

    fn ctx() -> MutationContext {
        MutationContext::new("org-1", "user-1")
    }

    fn input() -> CreateWorkOrderInput {
        CreateWorkOrderInput {
            title: "Offline WO".into(),
            equipment_id: Some("equip-1".into()),
            equipment_working_hours: Some(1250.0),
            has_pm: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_online_create_runs_side_effects() {
        let (service, backend, queue) = service_with(FakeBackend::default());

        let outcome = service.create_work_order(input(), &ctx()).await.unwrap();
        assert!(!outcome.queued_offline);
        assert_eq!(outcome.record.as_ref().unwrap().title, "Offline WO");
        assert!(outcome.notices.is_empty());
        assert!(queue.queued_items().is_empty());

        let calls = backend.calls();
        assert!(calls.contains(&BackendCall::WorkingHours("equip-1".into(), 1250.0)));
        assert!(calls.iter().any(|c| matches!(c, BackendCall::PmRecord(_))));
    }

    #[tokio::test]
    async fn test_connectivity_failure_queues_and_skips_side_effects() {
        let backend = FakeBackend::default();
        backend.push_create(Err(ApiError::Unreachable {
            url: "https://db.example.com".into(),
        }));
        let (service, backend, queue) = service_with(backend);

        let outcome = service.create_work_order(input(), &ctx()).await.unwrap();
        assert!(outcome.queued_offline);
        assert!(outcome.record.is_none());
        assert!(matches!(outcome.notices[0], Notice::SavedOffline(_)));

        let items = queue.queued_items();
        assert_eq!(items.len(), 1);
        assert_eq!(Some(items[0].id.clone()), outcome.queue_item_id);
        assert_eq!(items[0].status, QueueStatus::Pending);
        assert_eq!(items[0].retry_count, 0);
        assert_eq!(items[0].organization_id, "org-1");
        assert_eq!(items[0].user_id, "user-1");
        assert!(matches!(
            &items[0].operation,
            QueueOperation::WorkOrderCreate(i) if i.title == "Offline WO"
        ));

        // Only the primary write was attempted.
        assert_eq!(backend.calls().len(), 1);

        let merged = service.merged_work_orders(&[], "org-1", None);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_pending());
    }

    #[tokio::test]
    async fn test_rejection_is_propagated_and_not_queued() {
        let backend = FakeBackend::default();
        backend.push_create(Err(ApiError::Status {
            status: 403,
            message: "Permission denied".into(),
            details: None,
        }));
        let (service, _backend, queue) = service_with(backend);

        let err = service.create_work_order(input(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Status { status: 403, .. })));
        assert!(queue.queued_items().is_empty());
    }

    #[tokio::test]
    async fn test_side_effect_failures_downgrade_to_warnings() {
        let backend = FakeBackend {
            fail_working_hours: true,
            fail_pm_record: true,
            ..Default::default()
        };
        let (service, _backend, _queue) = service_with(backend);

        let outcome = service.create_work_order(input(), &ctx()).await.unwrap();
        assert!(outcome.record.is_some());
        assert_eq!(outcome.warnings().count(), 2);
    }

    #[tokio::test]
    async fn test_without_queue_connectivity_failure_surfaces() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_create(Err(ApiError::Timeout {
            url: "https://db.example.com".into(),
        }));
        let service: OfflineAwareWorkOrderService<_, Arc<SqliteOfflineQueue>> =
            OfflineAwareWorkOrderService::new(backend, None);

        let err = service.create_work_order(input(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Timeout { .. })));

        let server = vec![WorkOrder {
            id: "WO-1".into(),
            ..Default::default()
        }];
        let merged = service.merged_work_orders(&server, "org-1", None);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_pending_sync.is_none());
    }

    #[tokio::test]
    async fn test_validation_happens_before_network() {
        let (service, backend, _queue) = service_with(FakeBackend::default());
        let err = service
            .create_work_order(
                CreateWorkOrderInput {
                    title: "   ".into(),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = service
            .update_work_order(
                "WO-1",
                UpdateWorkOrderInput {
                    equipment_working_hours: Some(-4.0),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_update_is_queued() {
        let backend = FakeBackend::default();
        backend.push_update(Err(ApiError::Network {
            url: "https://db.example.com".into(),
            message: "connection reset".into(),
        }));
        let (service, _backend, queue) = service_with(backend);

        let outcome = service
            .update_work_order(
                "WO-9",
                UpdateWorkOrderInput {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();
        assert!(outcome.queued_offline);

        let items = queue.queued_items();
        assert!(matches!(
            &items[0].operation,
            QueueOperation::WorkOrderUpdate(u) if u.work_order_id == "WO-9"
        ));
        // Updates never show up as synthetic rows.
        assert!(service.merged_work_orders(&[], "org-1", None).is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_create_replays_with_same_key() {
        let backend = FakeBackend::default();
        backend.push_create(Err(ApiError::Timeout {
            url: "https://db.example.com".into(),
        }));
        let (service, backend, queue) = service_with(backend);

        let outcome = service.create_work_order(input(), &ctx()).await.unwrap();
        assert!(outcome.queued_offline);

        let report = run_sync_cycle(&queue, &*backend).await.unwrap();
        assert_eq!(report.synced, 1);

        let keys: Vec<Option<String>> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Create { idempotency_key, .. } => Some(idempotency_key),
                _ => None,
            })
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].is_some());
        assert_eq!(keys[0], keys[1]);
        assert_eq!(keys[0], outcome.queue_item_id);
    }

    #[tokio::test]
    async fn test_merged_view_is_scoped_to_organization() {
        let backend = FakeBackend::default();
        for _ in 0..2 {
            backend.push_create(Err(ApiError::Unreachable {
                url: "https://db.example.com".into(),
            }));
        }
        let (service, _backend, queue) = service_with(backend);

        service.create_work_order(input(), &ctx()).await.unwrap();
        service
            .create_work_order(
                CreateWorkOrderInput {
                    title: "Other org WO".into(),
                    ..Default::default()
                },
                &MutationContext::new("org-2", "user-2"),
            )
            .await
            .unwrap();
        assert_eq!(queue.queued_items().len(), 2);

        let org1 = service.merged_work_orders(&[], "org-1", None);
        assert_eq!(org1.len(), 1);
        assert_eq!(org1[0].work_order.title, "Offline WO");

        let org2 = service.merged_work_orders(&[], "org-2", None);
        assert_eq!(org2.len(), 1);
        assert_eq!(org2[0].work_order.organization_id, "org-2");

        assert!(service.merged_work_orders(&[], "org-3", None).is_empty());
    }

    #[tokio::test]
    async fn test_update_of_unsynced_create_queues_behind_it() {
        let backend = FakeBackend::default();
        backend.push_create(Err(ApiError::Unreachable {
            url: "https://db.example.com".into(),
        }));
        let (service, backend, queue) = service_with(backend);

        service.create_work_order(input(), &ctx()).await.unwrap();
        let synthetic = service.merged_work_orders(&[], "org-1", None)[0].id().to_string();
        let created_id = synthetic.strip_prefix(OFFLINE_ID_PREFIX).unwrap().to_string();

        let outcome = service
            .update_work_order(
                &synthetic,
                UpdateWorkOrderInput {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();
        assert!(outcome.queued_offline);
        // No direct write against an id the server has never seen.
        assert_eq!(backend.calls().len(), 1);

        let items = queue.queued_items();
        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[1].operation,
            QueueOperation::WorkOrderUpdate(u) if u.work_order_id == created_id
        ));

        let report = run_sync_cycle(&queue, &*backend).await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(backend.calls()[2], BackendCall::Update(created_id));
    }

    #[tokio::test]
    async fn test_update_of_synced_offline_row_targets_server_id() {
        let (service, backend, _queue) = service_with(FakeBackend::default());

        service
            .update_work_order(
                "offline-3f2a",
                UpdateWorkOrderInput {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec![BackendCall::Update("3f2a".into())]);
    }
}
