//! Alert store implementations (sled and in-memory).

use crate::alerts::AlertStore;
use crate::definitions::StoreError;
use crate::types::Alert;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<HashMap<(String, String), Alert>>,
}

impl MemoryAlertStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Alert>> {
        match self.alerts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AlertStore for MemoryAlertStore {
    fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.lock().insert(
            (alert.tenant_id.clone(), alert.alert_id.clone()),
            alert.clone(),
        );
        Ok(())
    }

    fn update_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.insert_alert(alert)
    }

    fn get_alert(&self, tenant_id: &str, alert_id: &str) -> Result<Option<Alert>, StoreError> {
        Ok(self
            .lock()
            .get(&(tenant_id.to_string(), alert_id.to_string()))
            .cloned())
    }

    fn alerts_for_trigger(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = self
            .lock()
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.trigger.id == trigger_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.ctime);
        Ok(alerts)
    }

    fn all_alerts(&self, tenant_id: &str) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = self
            .lock()
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.ctime);
        Ok(alerts)
    }
}

// ============================================================================
// Sled store
// ============================================================================

/// Sled-backed alert store. Key: `tenant NUL alert id`; value: JSON.
pub struct SledAlertStore {
    alerts: sled::Tree,
}

impl SledAlertStore {
    pub fn open(db: &sled::Db, keyspace: &str) -> Result<Self, StoreError> {
        Ok(Self {
            alerts: db.open_tree(format!("{}.alerts", keyspace))?,
        })
    }

    fn key(tenant_id: &str, alert_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(tenant_id.len() + alert_id.len() + 1);
        key.extend_from_slice(tenant_id.as_bytes());
        key.push(0);
        key.extend_from_slice(alert_id.as_bytes());
        key
    }

    fn tenant_prefix(tenant_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(tenant_id.len() + 1);
        prefix.extend_from_slice(tenant_id.as_bytes());
        prefix.push(0);
        prefix
    }

    fn scan(&self, tenant_id: &str) -> Result<Vec<Alert>, StoreError> {
        let mut alerts = Vec::new();
        for row in self.alerts.scan_prefix(Self::tenant_prefix(tenant_id)) {
            let (key, value) = row?;
            match serde_json::from_slice::<Alert>(&value) {
                Ok(alert) => alerts.push(alert),
                Err(e) => warn!(
                    "Skipping corrupt alert row {:?}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        alerts.sort_by_key(|a| a.ctime);
        Ok(alerts)
    }
}

impl AlertStore for SledAlertStore {
    fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(alert)?;
        self.alerts
            .insert(Self::key(&alert.tenant_id, &alert.alert_id), bytes)?;
        Ok(())
    }

    fn update_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.insert_alert(alert)
    }

    fn get_alert(&self, tenant_id: &str, alert_id: &str) -> Result<Option<Alert>, StoreError> {
        match self.alerts.get(Self::key(tenant_id, alert_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn alerts_for_trigger(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .scan(tenant_id)?
            .into_iter()
            .filter(|a| a.trigger.id == trigger_id)
            .collect())
    }

    fn all_alerts(&self, tenant_id: &str) -> Result<Vec<Alert>, StoreError> {
        self.scan(tenant_id)
    }
}
