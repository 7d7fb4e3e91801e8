//! Working memory: the facts visible to the rule engine.
//!
//! Two halves:
//! - [`ActiveSet`] — the immutable, copy-on-publish view of loadable
//!   triggers with their conditions indexed by data id. Rebuilt by the
//!   registry on every successful mutation and swapped atomically; the
//!   engine reads a consistent snapshot per tick.
//! - [`RuntimeState`] — the engine-owned volatile side: per-trigger mode,
//!   per-(trigger, mode) evaluation buffers and live dampening state.
//!   Single-writer, owned by the tick.

use crate::condition::{Condition, ConditionEvaluation};
use crate::dampening::Dampening;
use crate::types::{Mode, TenantId, Trigger, TriggerKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Key of a (trigger, mode) slot.
pub type ModeKey = (TenantId, String, Mode);

// ============================================================================
// Active Set (immutable snapshot)
// ============================================================================

/// Copy-on-publish snapshot of everything the matcher needs.
///
/// Contains only loadable triggers: enabled, standalone or member. Group
/// triggers are templates and never appear here; disabled triggers are
/// excluded until re-enabled.
#[derive(Debug, Default)]
pub struct ActiveSet {
    pub triggers: HashMap<TriggerKey, Arc<Trigger>>,
    /// (tenant, data id) -> conditions listening on that stream. COMPARE
    /// conditions are indexed under both of their data ids.
    pub conditions_by_data: HashMap<(TenantId, String), Vec<Arc<Condition>>>,
    /// Condition sets per (trigger, mode), ordered by set index.
    pub conditions_by_mode: HashMap<ModeKey, Vec<Arc<Condition>>>,
    /// Dampening settings per (trigger, mode); absent means default STRICT.
    pub dampenings: HashMap<ModeKey, Dampening>,
}

impl ActiveSet {
    /// Build a snapshot from definition clones.
    ///
    /// `triggers` must already be filtered to loadable ones; conditions and
    /// dampenings belonging to other triggers are skipped.
    pub fn build(
        triggers: Vec<Trigger>,
        conditions: Vec<Condition>,
        dampenings: Vec<Dampening>,
    ) -> Self {
        let mut set = Self::default();
        for trigger in triggers {
            set.triggers.insert(trigger.key(), Arc::new(trigger));
        }

        for condition in conditions {
            let trigger_key = (condition.tenant_id.clone(), condition.trigger_id.clone());
            if !set.triggers.contains_key(&trigger_key) {
                continue;
            }
            let condition = Arc::new(condition);
            let mut data_ids: HashSet<&str> = HashSet::new();
            data_ids.insert(condition.data_id());
            if let Some(data2) = condition.data2_id() {
                data_ids.insert(data2);
            }
            for data_id in data_ids {
                set.conditions_by_data
                    .entry((condition.tenant_id.clone(), data_id.to_string()))
                    .or_default()
                    .push(Arc::clone(&condition));
            }
            set.conditions_by_mode
                .entry((
                    condition.tenant_id.clone(),
                    condition.trigger_id.clone(),
                    condition.trigger_mode,
                ))
                .or_default()
                .push(condition);
        }
        for conditions in set.conditions_by_mode.values_mut() {
            conditions.sort_by_key(|c| c.condition_set_index);
        }

        for dampening in dampenings {
            let trigger_key = (dampening.tenant_id.clone(), dampening.trigger_id.clone());
            if !set.triggers.contains_key(&trigger_key) {
                continue;
            }
            set.dampenings.insert(
                (
                    dampening.tenant_id.clone(),
                    dampening.trigger_id.clone(),
                    dampening.trigger_mode,
                ),
                dampening.settings_snapshot(),
            );
        }

        set
    }

    /// Whether any active condition listens on this data stream.
    pub fn watches(&self, tenant_id: &str, data_id: &str) -> bool {
        self.conditions_by_data
            .contains_key(&(tenant_id.to_string(), data_id.to_string()))
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }
}

// ============================================================================
// Runtime State (engine-owned, volatile)
// ============================================================================

/// Per-trigger evaluation state owned by the single-writer tick.
#[derive(Debug, Default)]
pub struct RuntimeState {
    /// Current mode per trigger; absent means FIRING.
    modes: HashMap<TriggerKey, Mode>,
    /// Latest evaluation per condition set index, per (trigger, mode).
    /// Entries persist across ticks until a complete tuple flushes them.
    buffers: HashMap<ModeKey, Vec<Option<ConditionEvaluation>>>,
    /// Live dampening state per (trigger, mode).
    dampenings: HashMap<ModeKey, Dampening>,
}

impl RuntimeState {
    pub fn mode(&self, key: &TriggerKey) -> Mode {
        self.modes.get(key).copied().unwrap_or(Mode::Firing)
    }

    pub fn set_mode(&mut self, key: TriggerKey, mode: Mode) {
        self.modes.insert(key, mode);
    }

    /// Evaluation buffer for a (trigger, mode), sized to the condition set.
    ///
    /// A definition reload changes the set size; a stale buffer is resized
    /// (content dropped) so indices always line up with the current set.
    pub fn buffer(&mut self, key: ModeKey, set_size: usize) -> &mut Vec<Option<ConditionEvaluation>> {
        let buffer = self.buffers.entry(key).or_default();
        if buffer.len() != set_size {
            buffer.clear();
            buffer.resize_with(set_size, || None);
        }
        buffer
    }

    /// Live dampening for a (trigger, mode), initialized from the snapshot
    /// settings or the default STRICT(1,1,0) when the mode defines none.
    pub fn dampening(&mut self, key: &ModeKey, active: &ActiveSet) -> &mut Dampening {
        self.dampenings.entry(key.clone()).or_insert_with(|| {
            active.dampenings.get(key).cloned().unwrap_or_else(|| {
                Dampening::default_strict(key.0.clone(), key.1.clone(), key.2)
            })
        })
    }

    /// Drop all volatile state of one trigger (definition reload).
    pub fn reset_trigger(&mut self, key: &TriggerKey) {
        self.modes.remove(key);
        for mode in [Mode::Firing, Mode::AutoResolve] {
            let mode_key = (key.0.clone(), key.1.clone(), mode);
            self.buffers.remove(&mode_key);
            self.dampenings.remove(&mode_key);
        }
    }

    /// Reset one (trigger, mode) slot: buffer and dampening progress.
    pub fn reset_mode(&mut self, key: &ModeKey) {
        self.buffers.remove(key);
        if let Some(dampening) = self.dampenings.get_mut(key) {
            dampening.reset();
        }
    }

    /// Drop state for triggers no longer in the active set.
    pub fn retain_active(&mut self, active: &ActiveSet) {
        self.modes.retain(|key, _| active.triggers.contains_key(key));
        self.buffers
            .retain(|(tenant, trigger, _), _| {
                active
                    .triggers
                    .contains_key(&(tenant.clone(), trigger.clone()))
            });
        self.dampenings
            .retain(|(tenant, trigger, _), _| {
                active
                    .triggers
                    .contains_key(&(tenant.clone(), trigger.clone()))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{CompareOp, ConditionSpec};

    fn sample_trigger(id: &str) -> Trigger {
        Trigger::new("t1", id, id)
    }

    fn threshold_condition(trigger_id: &str, data_id: &str) -> Condition {
        Condition::new(
            "t1",
            trigger_id,
            Mode::Firing,
            ConditionSpec::Threshold {
                data_id: data_id.to_string(),
                op: CompareOp::Gt,
                threshold: 10.0,
            },
        )
    }

    #[test]
    fn test_build_indexes_by_data_id() {
        let set = ActiveSet::build(
            vec![sample_trigger("trig")],
            vec![threshold_condition("trig", "cpu")],
            vec![],
        );
        assert!(set.watches("t1", "cpu"));
        assert!(!set.watches("t1", "mem"));
        assert!(!set.watches("t2", "cpu"));
    }

    #[test]
    fn test_compare_condition_indexed_under_both_ids() {
        let condition = Condition::new(
            "t1",
            "trig",
            Mode::Firing,
            ConditionSpec::Compare {
                data_id: "used".to_string(),
                op: CompareOp::Gt,
                data2_id: "total".to_string(),
                data2_multiplier: 0.9,
            },
        );
        let set = ActiveSet::build(vec![sample_trigger("trig")], vec![condition], vec![]);
        assert!(set.watches("t1", "used"));
        assert!(set.watches("t1", "total"));
    }

    #[test]
    fn test_conditions_of_unknown_trigger_skipped() {
        let set = ActiveSet::build(vec![], vec![threshold_condition("ghost", "cpu")], vec![]);
        assert!(!set.watches("t1", "cpu"));
    }

    #[test]
    fn test_runtime_buffer_resizes_on_set_change() {
        let mut runtime = RuntimeState::default();
        let key: ModeKey = ("t1".to_string(), "trig".to_string(), Mode::Firing);
        runtime.buffer(key.clone(), 2);
        assert_eq!(runtime.buffer(key.clone(), 2).len(), 2);
        // Set size change drops stale entries.
        assert_eq!(runtime.buffer(key, 3).len(), 3);
    }

    #[test]
    fn test_runtime_default_dampening_injection() {
        let mut runtime = RuntimeState::default();
        let active = ActiveSet::default();
        let key: ModeKey = ("t1".to_string(), "trig".to_string(), Mode::Firing);
        let dampening = runtime.dampening(&key, &active);
        assert_eq!(dampening.eval_true_setting, 1);
    }
}
