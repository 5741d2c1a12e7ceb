//! Scripted in-process backend for service and sync tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::api::ApiError;
use crate::service::WorkOrderBackend;
use crate::work_order::{CreateWorkOrderInput, MutationContext, UpdateWorkOrderInput, WorkOrder};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendCall {
    Create {
        title: String,
        idempotency_key: Option<String>,
    },
    Update(String),
    WorkingHours(String, f64),
    PmRecord(String),
}

/// Answers from the scripted queues first, then succeeds by echoing input.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub(crate) creates: Mutex<VecDeque<Result<WorkOrder, ApiError>>>,
    pub(crate) updates: Mutex<VecDeque<Result<WorkOrder, ApiError>>>,
    pub(crate) calls: Mutex<Vec<BackendCall>>,
    pub(crate) fail_working_hours: bool,
    pub(crate) fail_pm_record: bool,
    pub(crate) unreachable: AtomicBool,
}

impl FakeBackend {
    pub(crate) fn push_create(&self, result: Result<WorkOrder, ApiError>) {
        self.creates.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_update(&self, result: Result<WorkOrder, ApiError>) {
        self.updates.lock().unwrap().push_back(result);
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WorkOrderBackend for FakeBackend {
    async fn create_work_order(
        &self,
        input: &CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        self.record(BackendCall::Create {
            title: input.title.clone(),
            idempotency_key: ctx.idempotency_key.clone(),
        });
        if let Some(scripted) = self.creates.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(WorkOrder {
            id: ctx
                .idempotency_key
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            organization_id: ctx.organization_id.clone(),
            title: input.title.clone(),
            equipment_id: input.equipment_id.clone(),
            has_pm: input.has_pm,
            created_by: Some(ctx.user_id.clone()),
            ..Default::default()
        })
    }

    async fn update_work_order(
        &self,
        work_order_id: &str,
        changes: &UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        self.record(BackendCall::Update(work_order_id.to_string()));
        if let Some(scripted) = self.updates.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(WorkOrder {
            id: work_order_id.to_string(),
            organization_id: ctx.organization_id.clone(),
            title: changes.title.clone().unwrap_or_default(),
            ..Default::default()
        })
    }

    async fn update_equipment_working_hours(
        &self,
        equipment_id: &str,
        hours: f64,
        _work_order_id: Option<&str>,
    ) -> Result<(), ApiError> {
        self.record(BackendCall::WorkingHours(equipment_id.to_string(), hours));
        if self.fail_working_hours {
            return Err(ApiError::Status {
                status: 500,
                message: "rpc failed".into(),
                details: None,
            });
        }
        Ok(())
    }

    async fn create_pm_record(
        &self,
        work_order: &WorkOrder,
        _template_id: Option<&str>,
        _ctx: &MutationContext,
    ) -> Result<(), ApiError> {
        self.record(BackendCall::PmRecord(work_order.id.clone()));
        if self.fail_pm_record {
            return Err(ApiError::Status {
                status: 500,
                message: "pm insert failed".into(),
                details: None,
            });
        }
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}
