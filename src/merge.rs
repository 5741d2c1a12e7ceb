//! Optimistic merge of queued work-order creates with server data.
//!
//! Pure and synchronous: takes the latest server list and a queue snapshot
//! and returns one display list. Synthetic entries come first, in queue
//! order, followed by the server entries exactly as received. When there is
//! nothing to overlay the output carries no marker fields at all, so "no
//! `_isPendingSync`" always means "confirmed by the server".

use serde::Serialize;

use crate::equipment::EquipmentNameCache;
use crate::queue::{QueueItem, QueueOperation};
use crate::work_order::{WorkOrder, WorkOrderStatus};

/// Prefix for synthetic ids. Server ids are UUIDs and never start with it.
pub const OFFLINE_ID_PREFIX: &str = "offline-";

/// A display row: a server work order, or one synthesized from the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedWorkOrder {
    #[serde(flatten)]
    pub work_order: WorkOrder,
    #[serde(rename = "_isPendingSync", skip_serializing_if = "Option::is_none")]
    pub is_pending_sync: Option<bool>,
    #[serde(rename = "_queueItemId", skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
}

impl MergedWorkOrder {
    pub fn id(&self) -> &str {
        &self.work_order.id
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending_sync == Some(true)
    }
}

impl From<WorkOrder> for MergedWorkOrder {
    fn from(work_order: WorkOrder) -> Self {
        Self {
            work_order,
            is_pending_sync: None,
            queue_item_id: None,
        }
    }
}

/// Synthetic id for a queue item.
pub fn synthetic_id(queue_item_id: &str) -> String {
    format!("{OFFLINE_ID_PREFIX}{queue_item_id}")
}

fn synthesize(item: &QueueItem, equipment: Option<&EquipmentNameCache>) -> Option<MergedWorkOrder> {
    let input = match &item.operation {
        QueueOperation::WorkOrderCreate(input) => input,
        QueueOperation::WorkOrderUpdate(_) => return None,
    };

    let equipment_name =
        equipment.and_then(|cache| cache.resolve(input.equipment_id.as_deref()));

    Some(MergedWorkOrder {
        work_order: WorkOrder {
            id: synthetic_id(&item.id),
            organization_id: item.organization_id.clone(),
            title: input.title.clone(),
            description: input.description.clone(),
            equipment_id: input.equipment_id.clone(),
            priority: input.priority,
            status: WorkOrderStatus::Submitted,
            assignee_id: input.assignee_id.clone(),
            team_id: input.team_id.clone(),
            due_date: input.due_date.clone(),
            estimated_hours: input.estimated_hours,
            created_by: Some(item.user_id.clone()),
            created_date: Some(item.timestamp.to_rfc3339()),
            has_pm: input.has_pm,
            equipment_name,
        },
        is_pending_sync: Some(true),
        queue_item_id: Some(item.id.clone()),
    })
}

/// Overlay in-flight queued creates onto the server list.
///
/// `queue` is `None` when the offline subsystem is not wired up; the server
/// list is then returned unchanged. Failed items and non-create operations
/// are never shown. Missing equipment names leave `equipment_name` empty.
pub fn merge_offline_work_orders(
    server: &[WorkOrder],
    queue: Option<&[QueueItem]>,
    equipment: Option<&EquipmentNameCache>,
) -> Vec<MergedWorkOrder> {
    let synthetic: Vec<MergedWorkOrder> = queue
        .unwrap_or_default()
        .iter()
        .filter(|item| item.status.is_in_flight())
        .filter_map(|item| synthesize(item, equipment))
        .collect();

    let mut merged = Vec::with_capacity(synthetic.len() + server.len());
    merged.extend(synthetic);
    merged.extend(server.iter().cloned().map(MergedWorkOrder::from));
    merged
}
