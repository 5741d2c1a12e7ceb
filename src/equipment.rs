//! Equipment name cache.
//!
//! Read-only id → name lookup used to enrich optimistic work orders with a
//! display name. Backed by the `equipment_cache` table so lookups keep
//! working while the device is offline.

use rusqlite::params;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::db::DbState;

/// Minimal equipment row as returned by the persistence service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquipmentSummary {
    pub id: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub working_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquipmentNameCache {
    names: HashMap<String, String>,
}

impl EquipmentNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_equipment(equipment: &[EquipmentSummary]) -> Self {
        let mut cache = Self::new();
        for item in equipment {
            cache.insert(&item.id, &item.name);
        }
        cache
    }

    pub fn insert(&mut self, id: &str, name: &str) {
        self.names.insert(id.to_string(), name.to_string());
    }

    /// Name for `id`; `None` when the id is absent, unknown, or blank.
    pub fn resolve(&self, id: Option<&str>) -> Option<String> {
        let id = id?.trim();
        if id.is_empty() {
            return None;
        }
        self.names
            .get(id)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Load the cached names for one organization. Returns an empty cache on
/// any storage error.
pub fn load_cache(db: &DbState, organization_id: &str) -> EquipmentNameCache {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            error!("equipment cache lock failed: {e}");
            return EquipmentNameCache::new();
        }
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM equipment_cache WHERE organization_id = ?1")
    {
        Ok(s) => s,
        Err(e) => {
            error!("equipment cache query failed: {e}");
            return EquipmentNameCache::new();
        }
    };

    let mut cache = EquipmentNameCache::new();
    match stmt.query_map(params![organization_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    }) {
        Ok(rows) => {
            for (id, name) in rows.flatten() {
                cache.insert(&id, &name);
            }
        }
        Err(e) => warn!("equipment cache read failed: {e}"),
    }
    cache
}

/// Replace the cached equipment for one organization.
pub fn store_cache(
    db: &DbState,
    organization_id: &str,
    equipment: &[EquipmentSummary],
) -> Result<usize, String> {
    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn
        .transaction()
        .map_err(|e| format!("equipment cache tx: {e}"))?;
    tx.execute(
        "DELETE FROM equipment_cache WHERE organization_id = ?1",
        params![organization_id],
    )
    .map_err(|e| format!("clear equipment cache: {e}"))?;

    let mut written = 0;
    for item in equipment {
        tx.execute(
            "INSERT OR REPLACE INTO equipment_cache (id, organization_id, name, working_hours, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![&item.id, organization_id, &item.name, item.working_hours],
        )
        .map_err(|e| format!("insert equipment cache: {e}"))?;
        written += 1;
    }
    tx.commit()
        .map_err(|e| format!("commit equipment cache: {e}"))?;

    info!(
        organization_id = %organization_id,
        count = written,
        "Equipment cache refreshed"
    );
    Ok(written)
}
