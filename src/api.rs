//! Hosted database REST client.
//!
//! Talks to the PostgREST-style API in front of the hosted database: table
//! endpoints under `/rest/v1/<table>` and stored procedures under
//! `/rest/v1/rpc/<name>`. Every failure is mapped onto [`ApiError`] so callers
//! can tell a connectivity problem (queue and retry later) from a rejection
//! (surface to the user).

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::equipment::EquipmentSummary;
use crate::work_order::{CreateWorkOrderInput, MutationContext, UpdateWorkOrderInput, WorkOrder};

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Cannot reach the server at {url}")]
    Unreachable { url: String },
    #[error("Connection to {url} timed out")]
    Timeout { url: String },
    #[error("Network error communicating with {url}: {message}")]
    Network { url: String, message: String },
    #[error("{message} (HTTP {status})")]
    Status {
        status: u16,
        message: String,
        details: Option<String>,
    },
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid JSON from server: {0}")]
    InvalidResponse(String),
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl ApiError {
    /// Map a transport error into a user-friendly variant.
    fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout {
                url: url.to_string(),
            };
        }
        if err.is_connect() {
            return ApiError::Unreachable {
                url: url.to_string(),
            };
        }
        if err.is_builder() {
            return ApiError::InvalidUrl(url.to_string());
        }
        ApiError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// The request never got a verdict from the server: queue it.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Unreachable { .. } | ApiError::Timeout { .. } | ApiError::Network { .. }
        )
    }

    /// The server rejected the request itself; replaying it cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            ApiError::InvalidUrl(_) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Default message for an HTTP status without a usable body.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Request rejected by server validation".to_string(),
        401 => "Session expired or API key invalid".to_string(),
        403 => "Permission denied".to_string(),
        404 => "Server endpoint not found".to_string(),
        409 => "Conflicting record".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// Build a status error, preferring PostgREST's `message` / `details`.
fn status_error(status: StatusCode, body_text: &str) -> ApiError {
    let trimmed = body_text.trim();
    let (message, details) = match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => {
            let message = json
                .get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_message(status));
            let details = json
                .get("details")
                .or_else(|| json.get("hint"))
                .and_then(|d| match d {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                });
            (message, details)
        }
        Err(_) if !trimmed.is_empty() => (status_message(status), Some(trimmed.to_string())),
        Err(_) => (status_message(status), None),
    };
    ApiError::Status {
        status: status.as_u16(),
        message,
        details,
    }
}

// ---------------------------------------------------------------------------
// URL normalisation and setup codes
// ---------------------------------------------------------------------------

/// Normalise the API base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/rest/v1` segment
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Connection details packed into an onboarding setup code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCode {
    pub api_url: String,
    pub anon_key: String,
    pub organization_id: Option<String>,
}

fn decode_setup_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

/// Decode a setup code: raw JSON or base64 (standard or URL-safe) JSON of
/// the form `{"url": ..., "key": ..., "org": ...}`.
pub fn decode_setup_code(raw: &str) -> Option<SetupCode> {
    let payload = decode_setup_payload(raw)?;
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let api_url = field(&["url", "apiUrl"]).map(|u| normalize_api_url(&u))?;
    let anon_key = field(&["key", "anonKey"])?;
    Some(SetupCode {
        api_url,
        anon_key,
        organization_id: field(&["org", "organizationId"]),
    })
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of a connectivity probe.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub api_url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

/// Authenticated client for the hosted database API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ApiError> {
        let base_url = normalize_api_url(&settings.api_url);
        if base_url.is_empty() {
            return Err(ApiError::InvalidUrl(settings.api_url.clone()));
        }
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self {
            base_url,
            anon_key: settings.anon_key.trim().to_string(),
            access_token: settings
                .access_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    /// Perform an authenticated request. `path` includes the leading slash and
    /// any query string, e.g. `/rest/v1/work_orders?id=eq.123`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        prefer: Option<&str>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);
        debug!(method = %method, path = %path, "api request");

        let mut req = self
            .http
            .request(method, &full_url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
            .header("Content-Type", "application/json");
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(&self.base_url, &e))?;

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Lightweight probe against the REST root.
    pub async fn health_check(&self) -> ConnectivityResult {
        let url = format!("{}/rest/v1/", self.base_url);
        let start = Instant::now();
        let resp = self
            .http
            .get(&url)
            .timeout(CONNECTIVITY_TIMEOUT)
            .header("apikey", &self.anon_key)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let latency = start.elapsed().as_millis() as u64;
                debug!(latency_ms = latency, "connectivity probe passed");
                ConnectivityResult {
                    success: true,
                    latency_ms: Some(latency),
                    error: None,
                }
            }
            Ok(r) => ConnectivityResult {
                success: false,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: Some(status_message(r.status())),
            },
            Err(e) => ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(ApiError::from_reqwest(&self.base_url, &e).to_string()),
            },
        }
    }

    fn first_row<T: serde::de::DeserializeOwned>(value: Value) -> Result<Option<T>, ApiError> {
        let row = match value {
            Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            Value::Array(_) | Value::Null => return Ok(None),
            other => other,
        };
        serde_json::from_value(row)
            .map(Some)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    pub async fn fetch_work_order(&self, id: &str) -> Result<Option<WorkOrder>, ApiError> {
        let path = format!("/rest/v1/work_orders?id=eq.{}&select=*", percent_encode(id));
        let value = self.request(Method::GET, &path, None, None).await?;
        Self::first_row(value)
    }

    pub async fn list_work_orders(&self, organization_id: &str) -> Result<Vec<WorkOrder>, ApiError> {
        let path = format!(
            "/rest/v1/work_orders?organization_id=eq.{}&select=*&order=created_date.desc",
            percent_encode(organization_id)
        );
        let value = self.request(Method::GET, &path, None, None).await?;
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    pub async fn list_equipment(
        &self,
        organization_id: &str,
    ) -> Result<Vec<EquipmentSummary>, ApiError> {
        let path = format!(
            "/rest/v1/equipment?organization_id=eq.{}&select=id,organization_id,name,working_hours",
            percent_encode(organization_id)
        );
        let value = self.request(Method::GET, &path, None, None).await?;
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Insert a work order. With an idempotency key the row id is the key
    /// and duplicates are ignored, so a replay returns the existing row.
    pub async fn insert_work_order(
        &self,
        input: &CreateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        let row = input.to_insert_row(ctx);
        let (path, prefer) = if ctx.idempotency_key.is_some() {
            (
                "/rest/v1/work_orders?on_conflict=id",
                "return=representation,resolution=ignore-duplicates",
            )
        } else {
            ("/rest/v1/work_orders", "return=representation")
        };

        let value = self
            .request(Method::POST, path, Some(&row), Some(prefer))
            .await?;
        if let Some(created) = Self::first_row::<WorkOrder>(value)? {
            info!(work_order_id = %created.id, "Work order created");
            return Ok(created);
        }

        // Duplicate ignored: the earlier attempt already landed.
        if let Some(key) = ctx.idempotency_key.as_deref() {
            if let Some(existing) = self.fetch_work_order(key).await? {
                info!(work_order_id = %existing.id, "Work order create deduplicated via idempotency key");
                return Ok(existing);
            }
        }
        Err(ApiError::InvalidResponse(
            "insert returned no work order row".to_string(),
        ))
    }

    pub async fn patch_work_order(
        &self,
        work_order_id: &str,
        changes: &UpdateWorkOrderInput,
        ctx: &MutationContext,
    ) -> Result<WorkOrder, ApiError> {
        let path = format!(
            "/rest/v1/work_orders?id=eq.{}&organization_id=eq.{}",
            percent_encode(work_order_id),
            percent_encode(&ctx.organization_id)
        );
        let body = changes.to_patch_row();
        let value = self
            .request(Method::PATCH, &path, Some(&body), Some("return=representation"))
            .await?;
        Self::first_row(value)?.ok_or_else(|| ApiError::Status {
            status: 404,
            message: "Work order not found".to_string(),
            details: Some(work_order_id.to_string()),
        })
    }

    /// Record a new hour-meter reading through the RPC that also writes the
    /// history row.
    pub async fn rpc_update_equipment_working_hours(
        &self,
        equipment_id: &str,
        hours: f64,
        work_order_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "p_equipment_id": equipment_id,
            "p_new_hours": hours,
            "p_update_source": "work_order",
            "p_work_order_id": work_order_id,
        });
        self.request(
            Method::POST,
            "/rest/v1/rpc/update_equipment_working_hours",
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn insert_pm_record(
        &self,
        work_order: &WorkOrder,
        template_id: Option<&str>,
        ctx: &MutationContext,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "work_order_id": &work_order.id,
            "equipment_id": &work_order.equipment_id,
            "organization_id": &ctx.organization_id,
            "created_by": &ctx.user_id,
            "template_id": template_id,
            "status": "pending",
            "checklist_data": [],
        });
        self.request(
            Method::POST,
            "/rest/v1/preventative_maintenance",
            Some(&body),
            Some("return=minimal"),
        )
        .await
        .map_err(|e| {
            warn!(work_order_id = %work_order.id, error = %e, "PM record insert failed");
            e
        })?;
        Ok(())
    }
}
