//! Sync tuning knobs.
//!
//! Values live in `local_settings` under the `sync` category and can be
//! overridden per process with `FLEET_OFFLINE_*` environment variables.
//! Unparseable values are logged and ignored.

use rusqlite::Connection;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::db;
use crate::queue::{DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_QUOTA_BYTES};

const CATEGORY: &str = "sync";
const ENV_PREFIX: &str = "FLEET_OFFLINE_";

const KEY_INTERVAL_SECS: &str = "interval_secs";
const KEY_MAX_RETRIES: &str = "max_retries";
const KEY_QUEUE_QUOTA_BYTES: &str = "queue_quota_bytes";
const KEY_REQUEST_TIMEOUT_SECS: &str = "request_timeout_secs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub max_retries: u32,
    pub queue_quota_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_quota_bytes: DEFAULT_QUEUE_QUOTA_BYTES,
            request_timeout_secs: 30,
        }
    }
}

fn env_key(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())
}

fn parse_value<T: FromStr>(source: &str, key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(source, key, value = raw, "Ignoring invalid sync setting");
            None
        }
    }
}

fn lookup<T: FromStr>(conn: &Connection, key: &str, default: T) -> T {
    if let Ok(raw) = std::env::var(env_key(key)) {
        if let Some(v) = parse_value("env", key, &raw) {
            return v;
        }
    }
    db::get_setting(conn, CATEGORY, key)
        .and_then(|raw| parse_value("local_settings", key, &raw))
        .unwrap_or(default)
}

impl SyncSettings {
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        let settings = Self {
            interval_secs: lookup(conn, KEY_INTERVAL_SECS, defaults.interval_secs),
            max_retries: lookup(conn, KEY_MAX_RETRIES, defaults.max_retries),
            queue_quota_bytes: lookup(conn, KEY_QUEUE_QUOTA_BYTES, defaults.queue_quota_bytes),
            request_timeout_secs: lookup(
                conn,
                KEY_REQUEST_TIMEOUT_SECS,
                defaults.request_timeout_secs,
            ),
        };
        settings.clamped()
    }

    /// Persist to `local_settings`. Environment overrides are not written.
    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        db::set_setting(conn, CATEGORY, KEY_INTERVAL_SECS, &self.interval_secs.to_string())?;
        db::set_setting(conn, CATEGORY, KEY_MAX_RETRIES, &self.max_retries.to_string())?;
        db::set_setting(
            conn,
            CATEGORY,
            KEY_QUEUE_QUOTA_BYTES,
            &self.queue_quota_bytes.to_string(),
        )?;
        db::set_setting(
            conn,
            CATEGORY,
            KEY_REQUEST_TIMEOUT_SECS,
            &self.request_timeout_secs.to_string(),
        )
    }

    /// Zero intervals and timeouts would spin or never complete.
    fn clamped(mut self) -> Self {
        self.interval_secs = self.interval_secs.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::run_migrations_for_test(&conn);
        conn
    }

    fn clear_env() {
        for key in [
            KEY_INTERVAL_SECS,
            KEY_MAX_RETRIES,
            KEY_QUEUE_QUOTA_BYTES,
            KEY_REQUEST_TIMEOUT_SECS,
        ] {
            std::env::remove_var(env_key(key));
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_nothing_stored() {
        clear_env();
        assert_eq!(SyncSettings::load(&conn()), SyncSettings::default());
    }

    #[test]
    #[serial]
    fn test_save_then_load() {
        clear_env();
        let conn = conn();
        let custom = SyncSettings {
            interval_secs: 60,
            max_retries: 2,
            queue_quota_bytes: 1024,
            request_timeout_secs: 5,
        };
        custom.save(&conn).unwrap();
        assert_eq!(SyncSettings::load(&conn), custom);
    }

    #[test]
    #[serial]
    fn test_env_overrides_and_invalid_values() {
        clear_env();
        let conn = conn();
        db::set_setting(&conn, CATEGORY, KEY_MAX_RETRIES, "7").unwrap();
        db::set_setting(&conn, CATEGORY, KEY_INTERVAL_SECS, "often").unwrap();

        std::env::set_var(env_key(KEY_MAX_RETRIES), "3");
        std::env::set_var(env_key(KEY_REQUEST_TIMEOUT_SECS), "0");
        let settings = SyncSettings::load(&conn);
        clear_env();

        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.interval_secs, SyncSettings::default().interval_secs);
        assert_eq!(settings.request_timeout_secs, 1);
        assert_eq!(env_key(KEY_MAX_RETRIES), "FLEET_OFFLINE_MAX_RETRIES");
    }
}
