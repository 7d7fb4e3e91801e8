//! In-memory definitions store.
//!
//! Primarily test support: same contract as the sled store, plus a write
//! failure toggle for exercising the registry's abort paths.

use crate::condition::Condition;
use crate::dampening::Dampening;
use crate::definitions::store::{DefinitionsDump, DefinitionsStore, StoreError};
use crate::types::{ActionDefinition, ActionPlugin, Mode, Trigger};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryInner {
    triggers: HashMap<(String, String), Trigger>,
    conditions: HashMap<(String, String, Mode), Vec<Condition>>,
    dampenings: HashMap<(String, String, Mode), Dampening>,
    plugins: HashMap<String, ActionPlugin>,
    actions: HashMap<(String, String, String), ActionDefinition>,
}

#[derive(Default)]
pub struct MemoryDefinitionsStore {
    inner: Mutex<MemoryInner>,
    fail_writes: AtomicBool,
}

impl MemoryDefinitionsStore {
    /// Make every subsequent write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl DefinitionsStore for MemoryDefinitionsStore {
    fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock()
            .triggers
            .insert((trigger.tenant_id.clone(), trigger.id.clone()), trigger.clone());
        Ok(())
    }

    fn delete_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock()
            .triggers
            .remove(&(tenant_id.to_string(), trigger_id.to_string()));
        Ok(())
    }

    fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
        conditions: &[Condition],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let key = (tenant_id.to_string(), trigger_id.to_string(), mode);
        let mut inner = self.lock();
        if conditions.is_empty() {
            inner.conditions.remove(&key);
        } else {
            inner.conditions.insert(key, conditions.to_vec());
        }
        Ok(())
    }

    fn delete_conditions(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.lock();
        for mode in [Mode::Firing, Mode::AutoResolve] {
            inner
                .conditions
                .remove(&(tenant_id.to_string(), trigger_id.to_string(), mode));
        }
        Ok(())
    }

    fn save_dampening(&self, dampening: &Dampening) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().dampenings.insert(
            (
                dampening.tenant_id.clone(),
                dampening.trigger_id.clone(),
                dampening.trigger_mode,
            ),
            dampening.clone(),
        );
        Ok(())
    }

    fn delete_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock()
            .dampenings
            .remove(&(tenant_id.to_string(), trigger_id.to_string(), mode));
        Ok(())
    }

    fn delete_dampenings(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.lock();
        for mode in [Mode::Firing, Mode::AutoResolve] {
            inner
                .dampenings
                .remove(&(tenant_id.to_string(), trigger_id.to_string(), mode));
        }
        Ok(())
    }

    fn save_action_plugin(&self, plugin: &ActionPlugin) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock()
            .plugins
            .insert(plugin.name.clone(), plugin.clone());
        Ok(())
    }

    fn delete_action_plugin(&self, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().plugins.remove(name);
        Ok(())
    }

    fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().actions.insert(
            (
                action.tenant_id.clone(),
                action.action_plugin.clone(),
                action.action_id.clone(),
            ),
            action.clone(),
        );
        Ok(())
    }

    fn delete_action(
        &self,
        tenant_id: &str,
        plugin: &str,
        action_id: &str,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().actions.remove(&(
            tenant_id.to_string(),
            plugin.to_string(),
            action_id.to_string(),
        ));
        Ok(())
    }

    fn load_all(&self) -> Result<DefinitionsDump, StoreError> {
        let inner = self.lock();
        Ok(DefinitionsDump {
            triggers: inner.triggers.values().cloned().collect(),
            conditions: inner
                .conditions
                .values()
                .flat_map(|set| set.iter().cloned())
                .collect(),
            dampenings: inner.dampenings.values().cloned().collect(),
            plugins: inner.plugins.values().cloned().collect(),
            actions: inner.actions.values().cloned().collect(),
        })
    }

    fn has_triggers(&self) -> Result<bool, StoreError> {
        Ok(!self.lock().triggers.is_empty())
    }
}
