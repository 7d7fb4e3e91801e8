//! Definition change events and listener registration.
//!
//! Listeners are notified synchronously with the triggering mutation, in
//! registration order, after the store write and cache update succeed. A
//! slow listener therefore blocks the mutator — listeners must be cheap
//! (the engine's own listener just marks triggers dirty).

use std::collections::HashSet;
use std::sync::Arc;

/// Type of definition change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionsEventType {
    TriggerCreate,
    TriggerUpdate,
    TriggerRemove,
    ConditionChange,
    DampeningChange,
}

/// One definition change, scoped to a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionsEvent {
    pub event_type: DefinitionsEventType,
    pub tenant_id: String,
    pub trigger_id: String,
}

impl DefinitionsEvent {
    pub fn new(event_type: DefinitionsEventType, tenant_id: &str, trigger_id: &str) -> Self {
        Self {
            event_type,
            tenant_id: tenant_id.to_string(),
            trigger_id: trigger_id.to_string(),
        }
    }
}

/// Receiver of definition change events.
pub trait DefinitionsListener: Send + Sync {
    fn on_event(&self, event: &DefinitionsEvent);
}

struct ListenerEntry {
    listener: Arc<dyn DefinitionsListener>,
    filter: HashSet<DefinitionsEventType>,
}

/// Ordered set of registered listeners.
///
/// Identity is `Arc` reference equality: registering the same `Arc` twice
/// is rejected, and unregistration removes exactly that `Arc`.
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: Vec<ListenerEntry>,
}

impl ListenerSet {
    /// Register a listener for the given event types. Returns false if this
    /// exact listener is already registered.
    pub fn register(
        &mut self,
        listener: Arc<dyn DefinitionsListener>,
        event_types: &[DefinitionsEventType],
    ) -> bool {
        if self
            .entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.listener, &listener))
        {
            return false;
        }
        self.entries.push(ListenerEntry {
            listener,
            filter: event_types.iter().copied().collect(),
        });
        true
    }

    /// Remove a listener by reference equality. Returns whether it was found.
    pub fn unregister(&mut self, listener: &Arc<dyn DefinitionsListener>) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !Arc::ptr_eq(&e.listener, listener));
        self.entries.len() != before
    }

    /// Deliver an event to every subscribed listener, in registration order.
    pub fn notify(&self, event: &DefinitionsEvent) {
        for entry in &self.entries {
            if entry.filter.contains(&event.event_type) {
                entry.listener.on_event(event);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
