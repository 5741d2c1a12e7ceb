//! Work order records and mutation inputs.
//!
//! Server rows use the hosted database's snake_case column names. Mutation
//! inputs are camelCase because they are also what gets persisted as queue
//! payloads.

use serde::{Deserialize, Serialize};

/// Priority levels accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkOrderPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Server-side work order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    #[default]
    Submitted,
    Accepted,
    Assigned,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

/// A work order as returned by the persistence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkOrder {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub priority: WorkOrderPriority,
    #[serde(default)]
    pub status: WorkOrderStatus,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub has_pm: bool,
    /// Display-only; joined server-side or resolved from the equipment cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_name: Option<String>,
}

/// Input for creating a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkOrderInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub priority: WorkOrderPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub has_pm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm_template_id: Option<String>,
    /// Current equipment hour-meter reading captured with the work order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_working_hours: Option<f64>,
}

/// Partial update of an existing work order. `None` fields are left as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkOrderInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<WorkOrderPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkOrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_working_hours: Option<f64>,
}

/// Tenant/actor context a mutation runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub organization_id: String,
    pub user_id: String,
    /// Replays of a queued create carry the queue item id here.
    pub idempotency_key: Option<String>,
}

impl MutationContext {
    pub fn new(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl CreateWorkOrderInput {
    /// Row body for the `work_orders` insert. The idempotency key, when
    /// present, becomes the row id so replays collide instead of duplicating.
    pub fn to_insert_row(&self, ctx: &MutationContext) -> serde_json::Value {
        let mut row = serde_json::json!({
            "organization_id": &ctx.organization_id,
            "title": self.title.trim(),
            "description": &self.description,
            "equipment_id": &self.equipment_id,
            "priority": self.priority,
            "status": WorkOrderStatus::Submitted,
            "due_date": &self.due_date,
            "estimated_hours": self.estimated_hours,
            "assignee_id": &self.assignee_id,
            "team_id": &self.team_id,
            "has_pm": self.has_pm,
            "created_by": &ctx.user_id,
        });
        if let (Some(key), serde_json::Value::Object(obj)) = (&ctx.idempotency_key, &mut row) {
            obj.insert("id".to_string(), serde_json::Value::String(key.clone()));
        }
        row
    }
}

impl UpdateWorkOrderInput {
    /// PATCH body with only the provided columns.
    pub fn to_patch_row(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(title) = &self.title {
            obj.insert("title".into(), serde_json::json!(title.trim()));
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), serde_json::json!(description));
        }
        if let Some(priority) = self.priority {
            obj.insert("priority".into(), serde_json::json!(priority));
        }
        if let Some(status) = self.status {
            obj.insert("status".into(), serde_json::json!(status));
        }
        if let Some(due_date) = &self.due_date {
            obj.insert("due_date".into(), serde_json::json!(due_date));
        }
        if let Some(hours) = self.estimated_hours {
            obj.insert("estimated_hours".into(), serde_json::json!(hours));
        }
        if let Some(assignee_id) = &self.assignee_id {
            obj.insert("assignee_id".into(), serde_json::json!(assignee_id));
        }
        if let Some(team_id) = &self.team_id {
            obj.insert("team_id".into(), serde_json::json!(team_id));
        }
        serde_json::Value::Object(obj)
    }

    pub fn is_empty(&self) -> bool {
        self.to_patch_row()
            .as_object()
            .map(|o| o.is_empty())
            .unwrap_or(true)
            && self.equipment_working_hours.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_row_uses_idempotency_key_as_id() {
        let input = CreateWorkOrderInput {
            title: "  Replace hydraulic hose ".into(),
            equipment_id: Some("equip-1".into()),
            priority: WorkOrderPriority::High,
            ..Default::default()
        };
        let plain = input.to_insert_row(&MutationContext::new("org-1", "user-1"));
        assert!(plain.get("id").is_none());
        assert_eq!(plain["title"], "Replace hydraulic hose");
        assert_eq!(plain["priority"], "high");
        assert_eq!(plain["status"], "submitted");
        assert_eq!(plain["created_by"], "user-1");

        let keyed = input.to_insert_row(
            &MutationContext::new("org-1", "user-1").with_idempotency_key("q-42"),
        );
        assert_eq!(keyed["id"], "q-42");
    }

    #[test]
    fn test_patch_row_only_contains_set_fields() {
        let changes = UpdateWorkOrderInput {
            status: Some(WorkOrderStatus::InProgress),
            ..Default::default()
        };
        let row = changes.to_patch_row();
        assert_eq!(row, serde_json::json!({ "status": "in_progress" }));
        assert!(!changes.is_empty());
        assert!(UpdateWorkOrderInput::default().is_empty());
    }

    #[test]
    fn test_server_row_deserializes_with_missing_optionals() {
        let row = serde_json::json!({
            "id": "wo-1",
            "organization_id": "org-1",
            "title": "Oil change",
            "priority": "low",
            "status": "on_hold"
        });
        let wo: WorkOrder = serde_json::from_value(row).unwrap();
        assert_eq!(wo.priority, WorkOrderPriority::Low);
        assert_eq!(wo.status, WorkOrderStatus::OnHold);
        assert_eq!(wo.description, "");
        assert!(wo.equipment_name.is_none());
    }
}
