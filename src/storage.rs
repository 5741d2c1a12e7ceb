//! Connection credentials in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Nothing secret is written to the
//! SQLite database.

use keyring::Entry;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::{decode_setup_code, normalize_api_url, ConnectionSettings};
use crate::work_order::MutationContext;

const SERVICE_NAME: &str = "fleet-offline";

// Credential keys
const KEY_API_URL: &str = "api_url";
const KEY_ANON_KEY: &str = "anon_key";
const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_ORG_ID: &str = "organization_id";
const KEY_USER_ID: &str = "user_id";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_API_URL,
    KEY_ANON_KEY,
    KEY_ACCESS_TOKEN,
    KEY_ORG_ID,
    KEY_USER_ID,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// Credential payloads
// ---------------------------------------------------------------------------

/// Credentials accepted from the sign-in flow, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub api_url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
}

fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Validate a credentials payload.
///
/// Accepts camelCase or snake_case keys. A `setupCode` supplies the API URL,
/// anon key and organization in one go; explicit fields win over it.
pub fn parse_credentials(payload: &Value) -> Result<CredentialUpdate, String> {
    let setup = match str_field(payload, &["setupCode", "setup_code"]) {
        Some(code) => Some(decode_setup_code(&code).ok_or("Invalid setup code")?),
        None => None,
    };

    let api_url = str_field(payload, &["apiUrl", "api_url"])
        .map(|u| normalize_api_url(&u))
        .or_else(|| setup.as_ref().map(|s| s.api_url.clone()))
        .filter(|u| !u.is_empty())
        .ok_or("Missing required field: apiUrl")?;
    let anon_key = str_field(payload, &["anonKey", "anon_key"])
        .or_else(|| setup.as_ref().map(|s| s.anon_key.clone()))
        .ok_or("Missing required field: anonKey")?;
    let organization_id = str_field(payload, &["organizationId", "organization_id"])
        .or_else(|| setup.and_then(|s| s.organization_id));

    Ok(CredentialUpdate {
        api_url,
        anon_key,
        access_token: str_field(payload, &["accessToken", "access_token"]),
        organization_id,
        user_id: str_field(payload, &["userId", "user_id"]),
    })
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Configured once the API URL and anon key are present.
pub fn is_configured() -> bool {
    has_credential(KEY_API_URL) && has_credential(KEY_ANON_KEY)
}

/// Stored config with the secrets masked out.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "api_url":         get_credential(KEY_API_URL),
        "organization_id": get_credential(KEY_ORG_ID),
        "user_id":         get_credential(KEY_USER_ID),
        "has_anon_key":    has_credential(KEY_ANON_KEY),
        "has_access_token": has_credential(KEY_ACCESS_TOKEN),
    })
}

/// Store credentials received from the sign-in flow.
pub fn update_credentials(payload: &Value) -> Result<Value, String> {
    let update = parse_credentials(payload)?;

    set_credential(KEY_API_URL, &update.api_url)?;
    set_credential(KEY_ANON_KEY, &update.anon_key)?;
    if let Some(token) = update.access_token.as_deref() {
        set_credential(KEY_ACCESS_TOKEN, token)?;
    }
    if let Some(org) = update.organization_id.as_deref() {
        set_credential(KEY_ORG_ID, org)?;
    }
    if let Some(user) = update.user_id.as_deref() {
        set_credential(KEY_USER_ID, user)?;
    }

    info!(api_url = %update.api_url, "connection credentials updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Drop only the session token (sign-out keeps the server binding).
pub fn clear_session() -> Result<(), String> {
    delete_credential(KEY_ACCESS_TOKEN)?;
    delete_credential(KEY_USER_ID)
}

/// Delete every stored credential.
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset, deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}

/// Client settings from the stored credentials, if configured.
pub fn connection_settings(request_timeout: Duration) -> Option<ConnectionSettings> {
    Some(ConnectionSettings {
        api_url: get_credential(KEY_API_URL)?,
        anon_key: get_credential(KEY_ANON_KEY)?,
        access_token: get_credential(KEY_ACCESS_TOKEN),
        request_timeout,
    })
}

/// Acting organization and user for mutations, if signed in.
pub fn session_context() -> Option<MutationContext> {
    Some(MutationContext::new(
        get_credential(KEY_ORG_ID)?,
        get_credential(KEY_USER_ID)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;

    #[test]
    fn test_parse_explicit_fields() {
        let update = parse_credentials(&json!({
            "apiUrl": " db.example.com/ ",
            "anon_key": "anon-123",
            "accessToken": "jwt",
            "organizationId": "org-1",
            "userId": "user-1",
        }))
        .unwrap();
        assert_eq!(update.api_url, "https://db.example.com");
        assert_eq!(update.anon_key, "anon-123");
        assert_eq!(update.access_token.as_deref(), Some("jwt"));
        assert_eq!(update.organization_id.as_deref(), Some("org-1"));
        assert_eq!(update.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_parse_setup_code_with_override() {
        let code = base64::engine::general_purpose::STANDARD.encode(
            r#"{"url":"https://setup.example.com","key":"anon-setup","org":"org-setup"}"#,
        );
        let update = parse_credentials(&json!({
            "setupCode": code,
            "organizationId": "org-explicit",
        }))
        .unwrap();
        assert_eq!(update.api_url, "https://setup.example.com");
        assert_eq!(update.anon_key, "anon-setup");
        assert_eq!(update.organization_id.as_deref(), Some("org-explicit"));
        assert_eq!(update.access_token, None);
    }

    #[test]
    fn test_parse_rejects_missing_or_bad_input() {
        assert!(parse_credentials(&json!({ "anonKey": "k" })).is_err());
        assert!(parse_credentials(&json!({ "apiUrl": "https://x.example.com" })).is_err());
        assert!(parse_credentials(&json!({ "setupCode": "%%%not-a-code" })).is_err());
        assert!(parse_credentials(&json!({ "apiUrl": "   ", "anonKey": "k" })).is_err());
    }
}
