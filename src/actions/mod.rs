//! Action dispatch: best-effort, asynchronous notification fan-out.
//!
//! Alerts never wait on notification delivery. The dispatcher is a bounded
//! queue drained by a worker task; overflow drops the request and bumps a
//! counter rather than blocking the rule engine. The worker resolves the
//! plugin's default properties, merges the action's stored overrides, and
//! hands the result to the sink.

use crate::definitions::DefinitionsRegistry;
use crate::types::{Alert, TenantId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Dispatch failure. Logged, never surfaced to the trigger.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action sink failure: {0}")]
    Sink(String),
}

/// A queued request: one trigger action binding applied to one alert.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub tenant_id: TenantId,
    pub action_plugin: String,
    pub action_id: String,
    pub alert: Alert,
}

/// An action request with its effective properties resolved.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    pub tenant_id: TenantId,
    pub action_plugin: String,
    pub action_id: String,
    pub properties: HashMap<String, String>,
    pub alert: Alert,
}

/// Receiver of resolved action requests.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn dispatch(&self, action: ResolvedAction) -> Result<(), ActionError>;
}

/// Default sink: log the dispatch and do nothing else.
pub struct LogSink;

#[async_trait]
impl ActionSink for LogSink {
    async fn dispatch(&self, action: ResolvedAction) -> Result<(), ActionError> {
        info!(
            tenant = %action.tenant_id,
            plugin = %action.action_plugin,
            action = %action.action_id,
            alert = %action.alert.alert_id,
            severity = %action.alert.severity,
            "Action dispatched"
        );
        Ok(())
    }
}

/// Handle to the bounded dispatch queue. Cheap to clone; the worker stops
/// once every handle is dropped.
#[derive(Clone)]
pub struct ActionDispatcher {
    tx: mpsc::Sender<ActionRequest>,
    dropped: Arc<AtomicU64>,
}

impl ActionDispatcher {
    /// Start the dispatch worker and return its handle.
    pub fn spawn(
        sink: Arc<dyn ActionSink>,
        registry: Arc<DefinitionsRegistry>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ActionRequest>(capacity);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let resolved = resolve_properties(&registry, request);
                if let Err(e) = sink.dispatch(resolved).await {
                    warn!("Action dispatch failed: {}", e);
                }
            }
            debug!("Action dispatch worker stopped");
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a request without blocking. A full queue drops the request.
    pub fn try_dispatch(&self, request: ActionRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    tenant = %request.tenant_id,
                    plugin = %request.action_plugin,
                    action = %request.action_id,
                    dropped_total = dropped,
                    "Action queue full — request dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Action dispatch worker gone — request discarded");
            }
        }
    }

    /// Requests dropped on overflow since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Merge the plugin's default properties with the action's overrides.
/// Unknown plugins or actions resolve to whatever is available; delivery
/// stays best-effort.
fn resolve_properties(registry: &DefinitionsRegistry, request: ActionRequest) -> ResolvedAction {
    let mut properties = registry
        .get_action_plugin(&request.action_plugin)
        .map(|plugin| plugin.default_properties)
        .unwrap_or_default();
    if let Some(action) =
        registry.get_action(&request.tenant_id, &request.action_plugin, &request.action_id)
    {
        properties.extend(action.properties);
    }
    ResolvedAction {
        tenant_id: request.tenant_id,
        action_plugin: request.action_plugin,
        action_id: request.action_id,
        properties,
        alert: request.alert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dampening::Dampening;
    use crate::storage::MemoryDefinitionsStore;
    use crate::types::{ActionDefinition, ActionPlugin, AlertStatus, Mode, Severity, Trigger};
    use std::sync::Mutex;
    use std::time::Duration;

    fn sample_alert() -> Alert {
        let trigger = Trigger::new("t1", "trig", "Trigger");
        Alert {
            tenant_id: "t1".to_string(),
            alert_id: "a-1".to_string(),
            ctime: 0,
            severity: Severity::High,
            status: AlertStatus::Open,
            dampening: Dampening::default_strict("t1", "trig", Mode::Firing),
            trigger,
            eval_sets: Vec::new(),
            context: HashMap::new(),
            ack_time: None,
            resolved_time: None,
        }
    }

    struct Recorder {
        seen: Mutex<Vec<ResolvedAction>>,
    }

    #[async_trait]
    impl ActionSink for Recorder {
        async fn dispatch(&self, action: ResolvedAction) -> Result<(), ActionError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(action);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_merges_plugin_defaults() {
        let registry = Arc::new(DefinitionsRegistry::new(Arc::new(
            MemoryDefinitionsStore::default(),
        )));
        registry.load_blocking().unwrap();
        registry
            .add_action_plugin(ActionPlugin {
                name: "email".to_string(),
                default_properties: [
                    ("from".to_string(), "klaxon@example.com".to_string()),
                    ("to".to_string(), "unset".to_string()),
                ]
                .into_iter()
                .collect(),
            })
            .unwrap();
        registry
            .add_action(
                "t1",
                ActionDefinition {
                    tenant_id: String::new(),
                    action_plugin: "email".to_string(),
                    action_id: "ops".to_string(),
                    properties: [("to".to_string(), "ops@example.com".to_string())]
                        .into_iter()
                        .collect(),
                },
            )
            .unwrap();

        let sink = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let dispatcher = ActionDispatcher::spawn(sink.clone(), registry, 8);
        dispatcher.try_dispatch(ActionRequest {
            tenant_id: "t1".to_string(),
            action_plugin: "email".to_string(),
            action_id: "ops".to_string(),
            alert: sample_alert(),
        });

        // Give the worker a moment to drain.
        for _ in 0..50 {
            if !sink.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].properties.get("to").map(String::as_str),
            Some("ops@example.com")
        );
        assert_eq!(
            seen[0].properties.get("from").map(String::as_str),
            Some("klaxon@example.com")
        );
    }

    #[tokio::test]
    async fn test_overflow_drops_and_counts() {
        struct Stuck;
        #[async_trait]
        impl ActionSink for Stuck {
            async fn dispatch(&self, _action: ResolvedAction) -> Result<(), ActionError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let registry = Arc::new(DefinitionsRegistry::new(Arc::new(
            MemoryDefinitionsStore::default(),
        )));
        registry.load_blocking().unwrap();
        let dispatcher = ActionDispatcher::spawn(Arc::new(Stuck), registry, 1);

        // Fill the single-slot queue (plus the one the worker takes), then
        // overflow must drop without blocking.
        for _ in 0..8 {
            dispatcher.try_dispatch(ActionRequest {
                tenant_id: "t1".to_string(),
                action_plugin: "email".to_string(),
                action_id: "ops".to_string(),
                alert: sample_alert(),
            });
        }
        assert!(dispatcher.dropped_count() >= 5);
    }
}
