//! Alert producer: persistence, action fan-out and lifecycle transitions.
//!
//! The rule engine mints alerts; the producer takes a tick's outcome and
//! applies the side effects: write alerts to the store with lifecycle OPEN,
//! enqueue one action request per trigger binding, transition open alerts on
//! auto-resolution, and run the manual acknowledge/resolve operations.

use super::{AlertError, AlertStore};
use crate::actions::{ActionDispatcher, ActionRequest};
use crate::definitions::DefinitionsRegistry;
use crate::engine::{AutoResolution, TickOutcome};
use crate::types::{now_millis, Alert, AlertStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AlertProducer {
    store: Arc<dyn AlertStore>,
    registry: Arc<DefinitionsRegistry>,
    dispatcher: Option<ActionDispatcher>,
}

impl AlertProducer {
    pub fn new(store: Arc<dyn AlertStore>, registry: Arc<DefinitionsRegistry>) -> Self {
        Self {
            store,
            registry,
            dispatcher: None,
        }
    }

    /// Attach the action dispatch queue. Without one, bindings are skipped
    /// (embedded/test use).
    pub fn with_dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Apply one tick's side effects.
    ///
    /// Store failures are logged and do not stop the remaining alerts:
    /// alert delivery is at-most-once by design.
    pub fn publish(&self, outcome: &TickOutcome) {
        for alert in &outcome.alerts {
            if let Err(e) = self.store.insert_alert(alert) {
                warn!(
                    tenant = %alert.tenant_id,
                    alert = %alert.alert_id,
                    "Failed to persist alert: {}",
                    e
                );
            }
            self.dispatch_actions(alert);
        }
        for resolution in &outcome.auto_resolutions {
            self.apply_auto_resolution(resolution);
        }
    }

    fn dispatch_actions(&self, alert: &Alert) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        for (plugin, action_ids) in &alert.trigger.actions {
            for action_id in action_ids {
                dispatcher.try_dispatch(ActionRequest {
                    tenant_id: alert.tenant_id.clone(),
                    action_plugin: plugin.clone(),
                    action_id: action_id.clone(),
                    alert: alert.clone(),
                });
            }
        }
    }

    fn apply_auto_resolution(&self, resolution: &AutoResolution) {
        if !resolution.resolve_alerts {
            return;
        }
        let open = match self
            .store
            .alerts_for_trigger(&resolution.tenant_id, &resolution.trigger_id)
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(
                    tenant = %resolution.tenant_id,
                    trigger = %resolution.trigger_id,
                    "Auto-resolve alert query failed: {}",
                    e
                );
                return;
            }
        };
        let now = now_millis();
        let mut resolved = 0usize;
        for mut alert in open.into_iter().filter(|a| a.status.is_open()) {
            alert.status = AlertStatus::AutoResolved;
            alert.resolved_time = Some(now);
            if let Err(e) = self.store.update_alert(&alert) {
                warn!(alert = %alert.alert_id, "Auto-resolve update failed: {}", e);
            } else {
                resolved += 1;
            }
        }
        if resolved > 0 {
            info!(
                tenant = %resolution.tenant_id,
                trigger = %resolution.trigger_id,
                resolved,
                "Open alerts auto-resolved"
            );
        }
        self.maybe_auto_enable(&resolution.tenant_id, &resolution.trigger_id);
    }

    // ========================================================================
    // Manual lifecycle
    // ========================================================================

    /// OPEN -> ACKNOWLEDGED.
    pub fn acknowledge(&self, tenant_id: &str, alert_id: &str) -> Result<Alert, AlertError> {
        let mut alert = self.fetch(tenant_id, alert_id)?;
        if alert.status != AlertStatus::Open {
            return Err(AlertError::IllegalTransition(format!(
                "alert {} is {}, only OPEN alerts can be acknowledged",
                alert_id, alert.status
            )));
        }
        alert.status = AlertStatus::Acknowledged;
        alert.ack_time = Some(now_millis());
        self.store.update_alert(&alert)?;
        Ok(alert)
    }

    /// OPEN or ACKNOWLEDGED -> RESOLVED. Resolving the trigger's last open
    /// alert re-enables an auto-enable trigger that auto-disabled itself.
    pub fn resolve(&self, tenant_id: &str, alert_id: &str) -> Result<Alert, AlertError> {
        let mut alert = self.fetch(tenant_id, alert_id)?;
        if !alert.status.is_open() {
            return Err(AlertError::IllegalTransition(format!(
                "alert {} is already {}",
                alert_id, alert.status
            )));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_time = Some(now_millis());
        self.store.update_alert(&alert)?;
        self.maybe_auto_enable(tenant_id, &alert.trigger.id);
        Ok(alert)
    }

    fn fetch(&self, tenant_id: &str, alert_id: &str) -> Result<Alert, AlertError> {
        self.store
            .get_alert(tenant_id, alert_id)?
            .ok_or_else(|| AlertError::NotFound {
                tenant_id: tenant_id.to_string(),
                alert_id: alert_id.to_string(),
            })
    }

    /// Re-enable a disabled auto-enable trigger once no open alerts remain.
    fn maybe_auto_enable(&self, tenant_id: &str, trigger_id: &str) {
        let trigger = match self.registry.get_trigger(tenant_id, trigger_id) {
            Ok(trigger) => trigger,
            Err(_) => return,
        };
        if !trigger.auto_enable || trigger.enabled {
            return;
        }
        let still_open = match self.store.alerts_for_trigger(tenant_id, trigger_id) {
            Ok(alerts) => alerts.iter().any(|a| a.status.is_open()),
            Err(e) => {
                warn!(trigger = trigger_id, "Auto-enable alert query failed: {}", e);
                return;
            }
        };
        if still_open {
            return;
        }
        debug!(
            tenant = tenant_id,
            trigger = trigger_id,
            "All alerts resolved — auto-enabling trigger"
        );
        if let Err(e) = self.registry.set_trigger_enabled(tenant_id, trigger_id, true) {
            warn!(trigger = trigger_id, "Auto-enable failed: {}", e);
        }
    }
}
