//! In-memory definitions registry.
//!
//! The registry is the engine's authoritative view of triggers, conditions
//! and dampenings. Mutations are write-through: the external store is
//! written first (a `StoreError` aborts the operation before anything else
//! happens), then the cache is updated, a fresh [`ActiveSet`] snapshot is
//! published via arc-swap, and finally listeners are notified synchronously
//! in registration order.
//!
//! A single write lock over the cache makes mutations linearizable; readers
//! either use the cheap copy-on-publish snapshot (the engine) or take the
//! read lock (API-style getters).

use super::events::{DefinitionsEvent, DefinitionsEventType, DefinitionsListener, ListenerSet};
use super::store::{DefinitionsDump, DefinitionsStore, StoreError};
use super::DefinitionsError;
use crate::condition::Condition;
use crate::dampening::Dampening;
use crate::engine::working_memory::{ActiveSet, ModeKey};
use crate::types::{ActionDefinition, ActionPlugin, Mode, TenantId, Trigger, TriggerKey};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

/// All cached definitions, guarded by the registry's lock.
#[derive(Default)]
pub(super) struct DefinitionsCache {
    pub(super) triggers: HashMap<TriggerKey, Trigger>,
    pub(super) conditions: HashMap<ModeKey, Vec<Condition>>,
    pub(super) dampenings: HashMap<ModeKey, Dampening>,
    pub(super) plugins: HashMap<String, ActionPlugin>,
    pub(super) actions: HashMap<(TenantId, String, String), ActionDefinition>,
}

/// The engine's registry of active definitions.
pub struct DefinitionsRegistry {
    pub(super) store: Arc<dyn DefinitionsStore>,
    pub(super) cache: RwLock<DefinitionsCache>,
    active: ArcSwap<ActiveSet>,
    listeners: Mutex<ListenerSet>,
    initialized: AtomicBool,
}

impl DefinitionsRegistry {
    pub fn new(store: Arc<dyn DefinitionsStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(DefinitionsCache::default()),
            active: ArcSwap::from_pointee(ActiveSet::default()),
            listeners: Mutex::new(ListenerSet::default()),
            initialized: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load all definitions from the store, bounded by `timeout`.
    ///
    /// The scan runs on the blocking pool; an overrun surfaces as
    /// `StoreError::Timeout` so a slow store cannot wedge startup forever.
    pub async fn init(&self, timeout: Duration) -> Result<usize, DefinitionsError> {
        let store = Arc::clone(&self.store);
        let scan = tokio::task::spawn_blocking(move || store.load_all());
        let dump = match tokio::time::timeout(timeout, scan).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(StoreError::Backend(join_err.to_string()).into());
            }
            Err(_) => return Err(StoreError::Timeout(timeout.as_secs()).into()),
        };
        Ok(self.apply_dump(dump))
    }

    /// Synchronous variant of [`init`](Self::init) for embedded use.
    pub fn load_blocking(&self) -> Result<usize, DefinitionsError> {
        let dump = self.store.load_all()?;
        Ok(self.apply_dump(dump))
    }

    fn apply_dump(&self, dump: DefinitionsDump) -> usize {
        let mut cache = self.cache_write();
        *cache = DefinitionsCache::default();
        for trigger in dump.triggers {
            cache.triggers.insert(trigger.key(), trigger);
        }
        for condition in dump.conditions {
            cache
                .conditions
                .entry(mode_key(
                    &condition.tenant_id,
                    &condition.trigger_id,
                    condition.trigger_mode,
                ))
                .or_default()
                .push(condition);
        }
        for set in cache.conditions.values_mut() {
            set.sort_by_key(|c| c.condition_set_index);
        }
        for dampening in dump.dampenings {
            cache.dampenings.insert(
                mode_key(
                    &dampening.tenant_id,
                    &dampening.trigger_id,
                    dampening.trigger_mode,
                ),
                dampening.settings_snapshot(),
            );
        }
        for plugin in dump.plugins {
            cache.plugins.insert(plugin.name.clone(), plugin);
        }
        for action in dump.actions {
            cache.actions.insert(
                (
                    action.tenant_id.clone(),
                    action.action_plugin.clone(),
                    action.action_id.clone(),
                ),
                action,
            );
        }
        let count = cache.triggers.len();
        self.publish_locked(&cache);
        drop(cache);
        self.initialized.store(true, Ordering::SeqCst);
        info!("Definitions registry loaded: {} triggers", count);
        count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Current copy-on-publish snapshot for the rule engine.
    pub fn active_snapshot(&self) -> Arc<ActiveSet> {
        self.active.load_full()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Subscribe to the given event types. Delivery is synchronous with the
    /// mutation, in registration order; identity is `Arc` reference equality.
    pub fn register_listener(
        &self,
        listener: Arc<dyn DefinitionsListener>,
        event_types: &[DefinitionsEventType],
    ) -> bool {
        self.listeners_lock().register(listener, event_types)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn DefinitionsListener>) -> bool {
        self.listeners_lock().unregister(listener)
    }

    pub(super) fn notify(&self, events: Vec<DefinitionsEvent>) {
        let listeners = self.listeners_lock();
        for event in &events {
            listeners.notify(event);
        }
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Add a new trigger. Fails with `IllegalState` if the id exists.
    ///
    /// A group trigger is accepted but never scheduled for evaluation;
    /// loadable triggers appear in the published active set immediately.
    pub fn add_trigger(
        &self,
        tenant_id: &str,
        mut trigger: Trigger,
    ) -> Result<Trigger, DefinitionsError> {
        trigger.tenant_id = tenant_id.to_string();
        trigger.validate().map_err(DefinitionsError::Validation)?;

        let event = {
            let mut cache = self.cache_write();
            if cache.triggers.contains_key(&trigger.key()) {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} already exists for tenant {}",
                    trigger.id, tenant_id
                )));
            }
            self.store.save_trigger(&trigger)?;
            cache.triggers.insert(trigger.key(), trigger.clone());
            self.publish_locked(&cache);
            DefinitionsEvent::new(DefinitionsEventType::TriggerCreate, tenant_id, &trigger.id)
        };
        self.notify(vec![event]);
        debug!(tenant = tenant_id, trigger = %trigger.id, "Trigger added");
        Ok(trigger)
    }

    /// Update a trigger in place.
    ///
    /// A non-orphan member must be edited through its group; neither group
    /// membership nor orphan status may change here. Updating a group
    /// trigger propagates the shared attributes to its non-orphan members.
    pub fn update_trigger(
        &self,
        tenant_id: &str,
        mut trigger: Trigger,
    ) -> Result<Trigger, DefinitionsError> {
        trigger.tenant_id = tenant_id.to_string();
        trigger.validate().map_err(DefinitionsError::Validation)?;

        let event = {
            let mut cache = self.cache_write();
            let existing = cache
                .triggers
                .get(&trigger.key())
                .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, &trigger.id))?;
            if existing.is_member() && !existing.orphan {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is managed by group {} and must be edited through it",
                    trigger.id,
                    existing.member_of.as_deref().unwrap_or("?")
                )));
            }
            if existing.group != trigger.group
                || existing.member_of != trigger.member_of
                || existing.orphan != trigger.orphan
            {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} group membership cannot be changed by update",
                    trigger.id
                )));
            }
            if existing.group {
                drop(cache);
                return self.update_group_trigger(tenant_id, trigger);
            }
            self.store.save_trigger(&trigger)?;
            cache.triggers.insert(trigger.key(), trigger.clone());
            self.publish_locked(&cache);
            DefinitionsEvent::new(DefinitionsEventType::TriggerUpdate, tenant_id, &trigger.id)
        };
        self.notify(vec![event]);
        Ok(trigger)
    }

    /// Flip a trigger's enabled flag. Used by the engine for auto-disable
    /// and auto-enable; intentionally bypasses the group-managed guard.
    pub fn set_trigger_enabled(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        enabled: bool,
    ) -> Result<(), DefinitionsError> {
        let event = {
            let mut cache = self.cache_write();
            let key = trigger_key(tenant_id, trigger_id);
            let current = cache
                .triggers
                .get(&key)
                .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, trigger_id))?;
            if current.enabled == enabled {
                return Ok(());
            }
            let mut updated = current.clone();
            updated.enabled = enabled;
            self.store.save_trigger(&updated)?;
            cache.triggers.insert(key, updated);
            self.publish_locked(&cache);
            DefinitionsEvent::new(DefinitionsEventType::TriggerUpdate, tenant_id, trigger_id)
        };
        info!(
            tenant = tenant_id,
            trigger = trigger_id,
            enabled,
            "Trigger enabled flag changed"
        );
        self.notify(vec![event]);
        Ok(())
    }

    /// Remove a trigger and cascade-delete its conditions, dampenings and
    /// bindings. For a group trigger, `keep_non_orphans` / `keep_orphans`
    /// control whether members are promoted to standalone or deleted.
    pub fn remove_trigger(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        keep_non_orphans: bool,
        keep_orphans: bool,
    ) -> Result<(), DefinitionsError> {
        let events = {
            let mut cache = self.cache_write();
            let key = trigger_key(tenant_id, trigger_id);
            let existing = cache
                .triggers
                .get(&key)
                .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, trigger_id))?
                .clone();

            let mut events = Vec::new();
            if existing.group {
                let member_ids: Vec<String> = cache
                    .triggers
                    .values()
                    .filter(|t| {
                        t.tenant_id == tenant_id && t.member_of.as_deref() == Some(trigger_id)
                    })
                    .map(|t| t.id.clone())
                    .collect();
                for member_id in member_ids {
                    let member_key = trigger_key(tenant_id, &member_id);
                    let member = match cache.triggers.get(&member_key) {
                        Some(m) => m.clone(),
                        None => continue,
                    };
                    let keep = if member.orphan {
                        keep_orphans
                    } else {
                        keep_non_orphans
                    };
                    if keep {
                        let mut promoted = member;
                        promoted.member_of = None;
                        promoted.orphan = false;
                        self.store.save_trigger(&promoted)?;
                        cache.triggers.insert(member_key, promoted);
                        events.push(DefinitionsEvent::new(
                            DefinitionsEventType::TriggerUpdate,
                            tenant_id,
                            &member_id,
                        ));
                    } else {
                        self.delete_trigger_locked(&mut cache, tenant_id, &member_id)?;
                        events.push(DefinitionsEvent::new(
                            DefinitionsEventType::TriggerRemove,
                            tenant_id,
                            &member_id,
                        ));
                    }
                }
            }

            self.delete_trigger_locked(&mut cache, tenant_id, trigger_id)?;
            events.push(DefinitionsEvent::new(
                DefinitionsEventType::TriggerRemove,
                tenant_id,
                trigger_id,
            ));
            self.publish_locked(&cache);
            events
        };
        self.notify(events);
        Ok(())
    }

    /// Cascade-delete one trigger row with its conditions and dampenings.
    pub(super) fn delete_trigger_locked(
        &self,
        cache: &mut DefinitionsCache,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<(), DefinitionsError> {
        self.store.delete_conditions(tenant_id, trigger_id)?;
        self.store.delete_dampenings(tenant_id, trigger_id)?;
        self.store.delete_trigger(tenant_id, trigger_id)?;
        cache.triggers.remove(&trigger_key(tenant_id, trigger_id));
        for mode in [Mode::Firing, Mode::AutoResolve] {
            cache.conditions.remove(&mode_key(tenant_id, trigger_id, mode));
            cache.dampenings.remove(&mode_key(tenant_id, trigger_id, mode));
        }
        Ok(())
    }

    pub fn get_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<Trigger, DefinitionsError> {
        self.cache_read()
            .triggers
            .get(&trigger_key(tenant_id, trigger_id))
            .cloned()
            .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, trigger_id))
    }

    pub fn get_triggers(&self, tenant_id: &str) -> Vec<Trigger> {
        self.cache_read()
            .triggers
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Member triggers of a group, optionally including orphans.
    pub fn get_member_triggers(
        &self,
        tenant_id: &str,
        group_id: &str,
        include_orphans: bool,
    ) -> Vec<Trigger> {
        self.cache_read()
            .triggers
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.member_of.as_deref() == Some(group_id)
                    && (include_orphans || !t.orphan)
            })
            .cloned()
            .collect()
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// Replace the whole condition set of one (trigger, mode).
    ///
    /// Indices are assigned contiguously in iteration order and the set size
    /// is stamped uniformly. Fires `ConditionChange` so the engine reloads
    /// the trigger.
    pub fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
        conditions: Vec<Condition>,
    ) -> Result<Vec<Condition>, DefinitionsError> {
        let (result, event) = {
            let mut cache = self.cache_write();
            let key = trigger_key(tenant_id, trigger_id);
            let (is_managed, group_of) = {
                let trigger = cache
                    .triggers
                    .get(&key)
                    .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, trigger_id))?;
                (
                    trigger.is_member() && !trigger.orphan,
                    trigger.member_of.clone(),
                )
            };
            if is_managed {
                return Err(DefinitionsError::IllegalState(format!(
                    "conditions of member trigger {} are managed by group {}",
                    trigger_id,
                    group_of.as_deref().unwrap_or("?")
                )));
            }
            let normalized = normalize_conditions(tenant_id, trigger_id, mode, conditions)?;
            let result =
                self.apply_conditions_locked(&mut cache, tenant_id, trigger_id, mode, normalized)?;
            self.publish_locked(&cache);
            (
                result,
                DefinitionsEvent::new(DefinitionsEventType::ConditionChange, tenant_id, trigger_id),
            )
        };
        self.notify(vec![event]);
        Ok(result)
    }

    /// Store write + cache update for one condition set. Caller holds the
    /// write lock and publishes afterwards.
    pub(super) fn apply_conditions_locked(
        &self,
        cache: &mut DefinitionsCache,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
        normalized: Vec<Condition>,
    ) -> Result<Vec<Condition>, DefinitionsError> {
        self.store
            .set_conditions(tenant_id, trigger_id, mode, &normalized)?;
        if normalized.is_empty() {
            cache.conditions.remove(&mode_key(tenant_id, trigger_id, mode));
        } else {
            cache
                .conditions
                .insert(mode_key(tenant_id, trigger_id, mode), normalized.clone());
        }
        Ok(normalized)
    }

    pub fn get_conditions(&self, tenant_id: &str, trigger_id: &str, mode: Mode) -> Vec<Condition> {
        self.cache_read()
            .conditions
            .get(&mode_key(tenant_id, trigger_id, mode))
            .cloned()
            .unwrap_or_default()
    }

    /// Conditions of both modes of one trigger.
    pub fn get_trigger_conditions(&self, tenant_id: &str, trigger_id: &str) -> Vec<Condition> {
        let cache = self.cache_read();
        [Mode::Firing, Mode::AutoResolve]
            .into_iter()
            .flat_map(|mode| {
                cache
                    .conditions
                    .get(&mode_key(tenant_id, trigger_id, mode))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    // ========================================================================
    // Dampening
    // ========================================================================

    /// Attach a dampening to a (trigger, mode). At most one may exist.
    pub fn add_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> Result<Dampening, DefinitionsError> {
        dampening.tenant_id = tenant_id.to_string();
        dampening.validate().map_err(DefinitionsError::Validation)?;

        let event = {
            let mut cache = self.cache_write();
            self.guard_dampening_target(&cache, tenant_id, &dampening)?;
            let key = mode_key(tenant_id, &dampening.trigger_id, dampening.trigger_mode);
            if cache.dampenings.contains_key(&key) {
                return Err(DefinitionsError::IllegalState(format!(
                    "dampening already defined for {}/{} {}",
                    tenant_id, dampening.trigger_id, dampening.trigger_mode
                )));
            }
            self.apply_dampening_locked(&mut cache, &dampening)?;
            self.publish_locked(&cache);
            DefinitionsEvent::new(
                DefinitionsEventType::DampeningChange,
                tenant_id,
                &dampening.trigger_id,
            )
        };
        self.notify(vec![event]);
        Ok(dampening)
    }

    /// Replace the dampening of a (trigger, mode).
    pub fn update_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> Result<Dampening, DefinitionsError> {
        dampening.tenant_id = tenant_id.to_string();
        dampening.validate().map_err(DefinitionsError::Validation)?;

        let event = {
            let mut cache = self.cache_write();
            self.guard_dampening_target(&cache, tenant_id, &dampening)?;
            let key = mode_key(tenant_id, &dampening.trigger_id, dampening.trigger_mode);
            if !cache.dampenings.contains_key(&key) {
                return Err(DefinitionsError::not_found(
                    "dampening",
                    tenant_id,
                    &dampening.trigger_id,
                ));
            }
            self.apply_dampening_locked(&mut cache, &dampening)?;
            self.publish_locked(&cache);
            DefinitionsEvent::new(
                DefinitionsEventType::DampeningChange,
                tenant_id,
                &dampening.trigger_id,
            )
        };
        self.notify(vec![event]);
        Ok(dampening)
    }

    pub fn remove_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
    ) -> Result<(), DefinitionsError> {
        let event = {
            let mut cache = self.cache_write();
            let key = mode_key(tenant_id, trigger_id, mode);
            if !cache.dampenings.contains_key(&key) {
                return Err(DefinitionsError::not_found("dampening", tenant_id, trigger_id));
            }
            self.store.delete_dampening(tenant_id, trigger_id, mode)?;
            cache.dampenings.remove(&key);
            self.publish_locked(&cache);
            DefinitionsEvent::new(DefinitionsEventType::DampeningChange, tenant_id, trigger_id)
        };
        self.notify(vec![event]);
        Ok(())
    }

    fn guard_dampening_target(
        &self,
        cache: &DefinitionsCache,
        tenant_id: &str,
        dampening: &Dampening,
    ) -> Result<(), DefinitionsError> {
        let trigger = cache
            .triggers
            .get(&trigger_key(tenant_id, &dampening.trigger_id))
            .ok_or_else(|| {
                DefinitionsError::not_found("trigger", tenant_id, &dampening.trigger_id)
            })?;
        if trigger.is_member() && !trigger.orphan {
            return Err(DefinitionsError::IllegalState(format!(
                "dampening of member trigger {} is managed by group {}",
                dampening.trigger_id,
                trigger.member_of.as_deref().unwrap_or("?")
            )));
        }
        Ok(())
    }

    pub(super) fn apply_dampening_locked(
        &self,
        cache: &mut DefinitionsCache,
        dampening: &Dampening,
    ) -> Result<(), DefinitionsError> {
        let snapshot = dampening.settings_snapshot();
        self.store.save_dampening(&snapshot)?;
        cache.dampenings.insert(
            mode_key(&snapshot.tenant_id, &snapshot.trigger_id, snapshot.trigger_mode),
            snapshot,
        );
        Ok(())
    }

    pub fn get_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
    ) -> Option<Dampening> {
        self.cache_read()
            .dampenings
            .get(&mode_key(tenant_id, trigger_id, mode))
            .cloned()
    }

    // ========================================================================
    // Action plugins and actions
    // ========================================================================

    pub fn add_action_plugin(&self, plugin: ActionPlugin) -> Result<(), DefinitionsError> {
        if plugin.name.is_empty() {
            return Err(DefinitionsError::Validation(
                "action plugin name must be non-empty".into(),
            ));
        }
        let mut cache = self.cache_write();
        if cache.plugins.contains_key(&plugin.name) {
            return Err(DefinitionsError::IllegalState(format!(
                "action plugin {} already exists",
                plugin.name
            )));
        }
        self.store.save_action_plugin(&plugin)?;
        cache.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    pub fn update_action_plugin(&self, plugin: ActionPlugin) -> Result<(), DefinitionsError> {
        let mut cache = self.cache_write();
        if !cache.plugins.contains_key(&plugin.name) {
            return Err(DefinitionsError::not_found("action plugin", "-", &plugin.name));
        }
        self.store.save_action_plugin(&plugin)?;
        cache.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    pub fn remove_action_plugin(&self, name: &str) -> Result<(), DefinitionsError> {
        let mut cache = self.cache_write();
        if cache.plugins.remove(name).is_none() {
            return Err(DefinitionsError::not_found("action plugin", "-", name));
        }
        self.store.delete_action_plugin(name)?;
        Ok(())
    }

    pub fn get_action_plugin(&self, name: &str) -> Option<ActionPlugin> {
        self.cache_read().plugins.get(name).cloned()
    }

    pub fn add_action(
        &self,
        tenant_id: &str,
        mut action: ActionDefinition,
    ) -> Result<ActionDefinition, DefinitionsError> {
        action.tenant_id = tenant_id.to_string();
        action.validate().map_err(DefinitionsError::Validation)?;

        let mut cache = self.cache_write();
        if !cache.plugins.contains_key(&action.action_plugin) {
            return Err(DefinitionsError::Validation(format!(
                "unknown action plugin {}",
                action.action_plugin
            )));
        }
        let key = (
            action.tenant_id.clone(),
            action.action_plugin.clone(),
            action.action_id.clone(),
        );
        if cache.actions.contains_key(&key) {
            return Err(DefinitionsError::IllegalState(format!(
                "action {}/{} already exists for tenant {}",
                action.action_plugin, action.action_id, tenant_id
            )));
        }
        self.store.save_action(&action)?;
        cache.actions.insert(key, action.clone());
        Ok(action)
    }

    pub fn update_action(
        &self,
        tenant_id: &str,
        mut action: ActionDefinition,
    ) -> Result<ActionDefinition, DefinitionsError> {
        action.tenant_id = tenant_id.to_string();
        action.validate().map_err(DefinitionsError::Validation)?;

        let mut cache = self.cache_write();
        let key = (
            action.tenant_id.clone(),
            action.action_plugin.clone(),
            action.action_id.clone(),
        );
        if !cache.actions.contains_key(&key) {
            return Err(DefinitionsError::not_found("action", tenant_id, &action.action_id));
        }
        self.store.save_action(&action)?;
        cache.actions.insert(key, action.clone());
        Ok(action)
    }

    pub fn remove_action(
        &self,
        tenant_id: &str,
        plugin: &str,
        action_id: &str,
    ) -> Result<(), DefinitionsError> {
        let mut cache = self.cache_write();
        let key = (tenant_id.to_string(), plugin.to_string(), action_id.to_string());
        if cache.actions.remove(&key).is_none() {
            return Err(DefinitionsError::not_found("action", tenant_id, action_id));
        }
        self.store.delete_action(tenant_id, plugin, action_id)?;
        Ok(())
    }

    pub fn get_action(
        &self,
        tenant_id: &str,
        plugin: &str,
        action_id: &str,
    ) -> Option<ActionDefinition> {
        self.cache_read()
            .actions
            .get(&(
                tenant_id.to_string(),
                plugin.to_string(),
                action_id.to_string(),
            ))
            .cloned()
    }

    // ========================================================================
    // Cross-tenant admin fetches
    // ========================================================================

    /// All triggers of every tenant. Admin use only.
    pub fn all_triggers(&self) -> Vec<Trigger> {
        self.cache_read().triggers.values().cloned().collect()
    }

    /// All triggers carrying the given tag, across tenants. A `None` value
    /// matches any value of the named tag.
    pub fn all_triggers_by_tag(&self, name: &str, value: Option<&str>) -> Vec<Trigger> {
        self.cache_read()
            .triggers
            .values()
            .filter(|t| match (t.tags.get(name), value) {
                (Some(_), None) => true,
                (Some(v), Some(want)) => v == want,
                (None, _) => false,
            })
            .cloned()
            .collect()
    }

    pub fn all_conditions(&self) -> Vec<Condition> {
        self.cache_read()
            .conditions
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    pub fn all_dampenings(&self) -> Vec<Dampening> {
        self.cache_read().dampenings.values().cloned().collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(super) fn cache_read(&self) -> RwLockReadGuard<'_, DefinitionsCache> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(super) fn cache_write(&self) -> RwLockWriteGuard<'_, DefinitionsCache> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn listeners_lock(&self) -> MutexGuard<'_, ListenerSet> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Rebuild and publish the active set from the locked cache.
    pub(super) fn publish_locked(&self, cache: &DefinitionsCache) {
        let triggers: Vec<Trigger> = cache
            .triggers
            .values()
            .filter(|t| t.is_loadable())
            .cloned()
            .collect();
        let conditions: Vec<Condition> = cache
            .conditions
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        let dampenings: Vec<Dampening> = cache.dampenings.values().cloned().collect();
        self.active
            .store(Arc::new(ActiveSet::build(triggers, conditions, dampenings)));
    }
}

/// Stamp identity fields and contiguous set indices onto a condition set.
pub(super) fn normalize_conditions(
    tenant_id: &str,
    trigger_id: &str,
    mode: Mode,
    conditions: Vec<Condition>,
) -> Result<Vec<Condition>, DefinitionsError> {
    let size = conditions.len();
    let mut normalized = Vec::with_capacity(size);
    for (i, mut condition) in conditions.into_iter().enumerate() {
        if condition.data_id().is_empty() {
            return Err(DefinitionsError::Validation(format!(
                "condition {} of trigger {} has an empty dataId",
                i + 1,
                trigger_id
            )));
        }
        if let Some(data2) = condition.data2_id() {
            if data2.is_empty() {
                return Err(DefinitionsError::Validation(format!(
                    "COMPARE condition {} of trigger {} has an empty data2Id",
                    i + 1,
                    trigger_id
                )));
            }
        }
        if let crate::condition::ConditionSpec::External { system_id, .. } = &condition.spec {
            if system_id.is_empty() {
                return Err(DefinitionsError::Validation(format!(
                    "EXTERNAL condition {} of trigger {} has an empty systemId",
                    i + 1,
                    trigger_id
                )));
            }
        }
        condition.tenant_id = tenant_id.to_string();
        condition.trigger_id = trigger_id.to_string();
        condition.trigger_mode = mode;
        condition.condition_set_size = size;
        condition.condition_set_index = i + 1;
        normalized.push(condition);
    }
    Ok(normalized)
}

pub(super) fn trigger_key(tenant_id: &str, trigger_id: &str) -> TriggerKey {
    (tenant_id.to_string(), trigger_id.to_string())
}

pub(super) fn mode_key(tenant_id: &str, trigger_id: &str, mode: Mode) -> ModeKey {
    (tenant_id.to_string(), trigger_id.to_string(), mode)
}

// ============================================================================
// Tests
// ============================================================================
