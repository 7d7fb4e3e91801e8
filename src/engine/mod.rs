//! Rule engine: indexed condition matching, multi-condition joins, and
//! dampening-driven alert emission.
//!
//! The engine is an indexed scan rather than a general production system:
//! incoming data looks up candidate conditions by `(tenant, data id)` in the
//! published active set, evaluations land in a per-(trigger, mode) buffer
//! keyed by condition set index, and a complete tuple advances that mode's
//! dampening. Satisfaction mints an alert (FIRING) or resolves the open
//! ones (AUTORESOLVE).
//!
//! One tick processes one batch, single-writer: ordering per data id is
//! ascending timestamp, data never survives a tick (retraction), and a
//! faulty condition only costs its own evaluation.

pub mod event_expr;
pub mod external;
pub mod working_memory;

use crate::condition::{Condition, ConditionEvaluation, ConditionSpec};
use crate::definitions::{
    DefinitionsEvent, DefinitionsEventType, DefinitionsListener, DefinitionsRegistry,
};
use crate::types::{
    now_millis, Alert, AlertStatus, Data, EventType, MatchPolicy, Mode, TenantId, Trigger,
    TriggerKey,
};
use external::ExternalRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use working_memory::{ActiveSet, ModeKey, RuntimeState};

/// Every definitions event type; the engine reloads on any of them.
const ALL_EVENTS: [DefinitionsEventType; 5] = [
    DefinitionsEventType::TriggerCreate,
    DefinitionsEventType::TriggerUpdate,
    DefinitionsEventType::TriggerRemove,
    DefinitionsEventType::ConditionChange,
    DefinitionsEventType::DampeningChange,
];

// ============================================================================
// Tick outcome
// ============================================================================

/// An AUTORESOLVE satisfaction: the trigger returned to FIRING mode and its
/// open alerts may be transitioned.
#[derive(Debug, Clone)]
pub struct AutoResolution {
    pub tenant_id: TenantId,
    pub trigger_id: String,
    /// Whether the trigger's open alerts transition to AUTO_RESOLVED.
    pub resolve_alerts: bool,
}

#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub data_evaluated: u64,
    pub data_dropped: u64,
    pub evaluations: u64,
    pub tuples: u64,
    pub evaluation_errors: u64,
}

/// Everything one tick produced. The caller (alert producer) persists and
/// dispatches; the engine itself only mutates its runtime state.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub alerts: Vec<Alert>,
    pub auto_resolutions: Vec<AutoResolution>,
    /// Triggers auto-disabled by this tick.
    pub disabled: Vec<TriggerKey>,
    pub stats: TickStats,
}

/// Cumulative engine counters, for status logging.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub ticks: u64,
    pub data_evaluated: u64,
    pub data_dropped: u64,
    pub evaluations: u64,
    pub tuples: u64,
    pub evaluation_errors: u64,
    pub alerts_fired: u64,
    pub auto_resolutions: u64,
}

// ============================================================================
// Reload listener
// ============================================================================

/// Collects dirty trigger keys from definition events; the engine drains
/// the set at the start of each tick and resets those triggers' runtime
/// state. Kept deliberately cheap: listener notification is synchronous
/// with the mutating call.
struct ReloadListener {
    dirty: Arc<Mutex<HashSet<TriggerKey>>>,
}

impl DefinitionsListener for ReloadListener {
    fn on_event(&self, event: &DefinitionsEvent) {
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert((event.tenant_id.clone(), event.trigger_id.clone()));
        }
    }
}

// ============================================================================
// Rule engine
// ============================================================================

pub struct RuleEngine {
    registry: Arc<DefinitionsRegistry>,
    externals: Arc<ExternalRegistry>,
    runtime: RuntimeState,
    dirty: Arc<Mutex<HashSet<TriggerKey>>>,
    stats: EngineStats,
}

impl RuleEngine {
    /// Create an engine bound to a registry. The engine subscribes to all
    /// definition events so reloads reset the affected trigger state
    /// between ticks.
    pub fn new(registry: Arc<DefinitionsRegistry>, externals: Arc<ExternalRegistry>) -> Self {
        let dirty = Arc::new(Mutex::new(HashSet::new()));
        let listener: Arc<dyn DefinitionsListener> = Arc::new(ReloadListener {
            dirty: Arc::clone(&dirty),
        });
        registry.register_listener(listener, &ALL_EVENTS);
        Self {
            registry,
            externals,
            runtime: RuntimeState::default(),
            dirty,
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Evaluate one batch of data to completion.
    ///
    /// The batch is stable-sorted by timestamp, which yields the required
    /// per-data-id ascending order while preserving arrival order across
    /// streams for equal timestamps. Data does not outlive the tick.
    pub fn tick(&mut self, mut batch: Vec<Data>) -> TickOutcome {
        let active = self.registry.active_snapshot();
        self.reload_dirty(&active);

        let mut outcome = TickOutcome::default();
        batch.sort_by_key(|d| d.timestamp);

        // Values seen this tick, for COMPARE joins. Dies with the tick:
        // this is the data retraction point.
        let mut seen: HashMap<(TenantId, String), Data> = HashMap::new();
        // Triggers auto-disabled mid-tick stop evaluating immediately,
        // before the registry change propagates through the snapshot.
        let mut disabled_now: HashSet<TriggerKey> = HashSet::new();

        for data in batch {
            let data_key = (data.tenant_id.clone(), data.id.clone());
            let Some(candidates) = active.conditions_by_data.get(&data_key) else {
                outcome.stats.data_dropped += 1;
                debug!(
                    tenant = %data.tenant_id,
                    data_id = %data.id,
                    "No condition listens on this data id — dropped"
                );
                continue;
            };
            outcome.stats.data_evaluated += 1;
            seen.insert(data_key, data.clone());

            // Candidate arcs are cloned so the snapshot borrow does not
            // pin `self` across the mutable runtime updates below.
            let candidates: Vec<Arc<Condition>> = candidates.clone();
            for condition in candidates {
                let trigger_key = (condition.tenant_id.clone(), condition.trigger_id.clone());
                let Some(trigger) = active.triggers.get(&trigger_key).cloned() else {
                    continue;
                };
                if disabled_now.contains(&trigger_key) {
                    continue;
                }
                if self.runtime.mode(&trigger_key) != condition.trigger_mode {
                    continue;
                }

                let Some(evaluation) =
                    self.evaluate(&condition, &data, &seen, &mut outcome.stats)
                else {
                    continue;
                };
                outcome.stats.evaluations += 1;

                self.join_and_dampen(
                    &trigger,
                    &condition,
                    evaluation,
                    &active,
                    &mut outcome,
                    &mut disabled_now,
                );
            }
        }

        self.stats.ticks += 1;
        self.stats.data_evaluated += outcome.stats.data_evaluated;
        self.stats.data_dropped += outcome.stats.data_dropped;
        self.stats.evaluations += outcome.stats.evaluations;
        self.stats.tuples += outcome.stats.tuples;
        self.stats.evaluation_errors += outcome.stats.evaluation_errors;
        self.stats.alerts_fired += outcome.alerts.len() as u64;
        self.stats.auto_resolutions += outcome.auto_resolutions.len() as u64;
        outcome
    }

    /// Reset runtime state of reloaded triggers and drop state of vanished
    /// ones. Runs between ticks, so a definition swap is atomic from the
    /// matcher's point of view.
    fn reload_dirty(&mut self, active: &ActiveSet) {
        let dirty: Vec<TriggerKey> = match self.dirty.lock() {
            Ok(mut dirty) => dirty.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        for key in &dirty {
            debug!(tenant = %key.0, trigger = %key.1, "Trigger reloaded — runtime state reset");
            self.runtime.reset_trigger(key);
        }
        self.runtime.retain_active(active);
    }

    /// Produce one condition evaluation, or `None` when the condition is
    /// not ready (COMPARE missing its second stream, EXTERNAL without a
    /// registered system). Evaluation errors count as `match = false`.
    fn evaluate(
        &self,
        condition: &Arc<Condition>,
        data: &Data,
        seen: &HashMap<(TenantId, String), Data>,
        stats: &mut TickStats,
    ) -> Option<ConditionEvaluation> {
        if let ConditionSpec::External { system_id, .. } = &condition.spec {
            let Some(matcher) = self.externals.get(system_id) else {
                debug!(
                    system = %system_id,
                    condition = %condition.condition_id(),
                    "No external system registered — condition skipped"
                );
                return None;
            };
            let matched = match matcher.evaluate(condition, data) {
                Ok(matched) => matched,
                Err(e) => {
                    stats.evaluation_errors += 1;
                    warn!(condition = %condition.condition_id(), "External evaluation failed: {}", e);
                    false
                }
            };
            return Some(ConditionEvaluation::new(
                (**condition).clone(),
                data.clone(),
                None,
                matched,
            ));
        }

        if let ConditionSpec::Compare { data2_id, .. } = &condition.spec {
            let (driving, value2) = if condition.data_id() == data.id {
                let value2 = seen
                    .get(&(data.tenant_id.clone(), data2_id.clone()))?
                    .value
                    .clone();
                (data.clone(), value2)
            } else {
                // This sample is the comparand; evaluate only if the primary
                // stream already arrived in this tick.
                let driving = seen
                    .get(&(data.tenant_id.clone(), condition.data_id().to_string()))?
                    .clone();
                (driving, data.value.clone())
            };
            let matched = self.run_predicate(condition, &driving, Some(&value2), stats);
            return Some(ConditionEvaluation::new(
                (**condition).clone(),
                driving,
                Some(value2),
                matched,
            ));
        }

        let matched = self.run_predicate(condition, data, None, stats);
        Some(ConditionEvaluation::new(
            (**condition).clone(),
            data.clone(),
            None,
            matched,
        ))
    }

    fn run_predicate(
        &self,
        condition: &Condition,
        data: &Data,
        value2: Option<&crate::types::DataValue>,
        stats: &mut TickStats,
    ) -> bool {
        match condition.matches(&data.value, value2) {
            Ok(matched) => matched,
            Err(e) => {
                stats.evaluation_errors += 1;
                warn!(
                    condition = %condition.condition_id(),
                    data_id = %data.id,
                    "Evaluation error (counted as no-match): {}",
                    e
                );
                false
            }
        }
    }

    /// Insert an evaluation into the trigger's buffer; a complete tuple
    /// advances dampening, and satisfaction fires.
    fn join_and_dampen(
        &mut self,
        trigger: &Arc<Trigger>,
        condition: &Condition,
        evaluation: ConditionEvaluation,
        active: &ActiveSet,
        outcome: &mut TickOutcome,
        disabled_now: &mut HashSet<TriggerKey>,
    ) {
        let mode = condition.trigger_mode;
        let mode_key: ModeKey = (
            condition.tenant_id.clone(),
            condition.trigger_id.clone(),
            mode,
        );
        let set_size = condition.condition_set_size;

        let tuple = {
            let buffer = self.runtime.buffer(mode_key.clone(), set_size);
            let index = condition.condition_set_index.saturating_sub(1);
            if index >= buffer.len() {
                // Stale condition vs. a freshly resized set; drop it.
                return;
            }
            buffer[index] = Some(evaluation);
            if buffer.iter().all(Option::is_some) {
                buffer.iter_mut().filter_map(Option::take).collect()
            } else {
                Vec::new()
            }
        };
        if tuple.is_empty() {
            return;
        }
        outcome.stats.tuples += 1;

        let true_eval = match trigger.match_policy(mode) {
            MatchPolicy::All => tuple.iter().all(|e| e.matched),
            MatchPolicy::Any => tuple.iter().any(|e| e.matched),
        };
        let now = tuple.iter().map(|e| e.eval_time).max().unwrap_or(0);

        let dampening = self.runtime.dampening(&mode_key, active);
        dampening.perform(true_eval, tuple, now);
        if !dampening.satisfied {
            return;
        }
        let eval_sets = dampening.take_satisfying_evals();
        let dampening_snapshot = dampening.settings_snapshot();
        dampening.reset();

        match mode {
            Mode::Firing => {
                self.on_firing(trigger, dampening_snapshot, eval_sets, outcome, disabled_now);
            }
            Mode::AutoResolve => self.on_auto_resolved(trigger, outcome),
        }
    }

    fn on_firing(
        &mut self,
        trigger: &Arc<Trigger>,
        dampening: crate::dampening::Dampening,
        eval_sets: Vec<Vec<ConditionEvaluation>>,
        outcome: &mut TickOutcome,
        disabled_now: &mut HashSet<TriggerKey>,
    ) {
        let alert = Alert {
            tenant_id: trigger.tenant_id.clone(),
            alert_id: uuid::Uuid::new_v4().to_string(),
            ctime: now_millis(),
            severity: trigger.severity,
            status: AlertStatus::Open,
            trigger: (**trigger).clone(),
            dampening,
            eval_sets,
            context: trigger.context.clone(),
            ack_time: None,
            resolved_time: None,
        };
        info!(
            tenant = %trigger.tenant_id,
            trigger = %trigger.id,
            severity = %trigger.severity,
            alert = %alert.alert_id,
            "🔔 Trigger fired"
        );
        outcome.alerts.push(alert);

        let key = trigger.key();
        if trigger.auto_disable {
            disabled_now.insert(key.clone());
            outcome.disabled.push(key.clone());
            if let Err(e) =
                self.registry
                    .set_trigger_enabled(&trigger.tenant_id, &trigger.id, false)
            {
                warn!(
                    tenant = %trigger.tenant_id,
                    trigger = %trigger.id,
                    "Auto-disable failed: {}",
                    e
                );
            }
        }
        if trigger.auto_resolve && trigger.event_type == EventType::Alert {
            self.runtime.set_mode(key.clone(), Mode::AutoResolve);
            self.runtime
                .reset_mode(&(key.0.clone(), key.1, Mode::AutoResolve));
        }
    }

    fn on_auto_resolved(&mut self, trigger: &Arc<Trigger>, outcome: &mut TickOutcome) {
        info!(
            tenant = %trigger.tenant_id,
            trigger = %trigger.id,
            "Trigger auto-resolve conditions satisfied — back to FIRING"
        );
        outcome.auto_resolutions.push(AutoResolution {
            tenant_id: trigger.tenant_id.clone(),
            trigger_id: trigger.id.clone(),
            resolve_alerts: trigger.auto_resolve_alerts,
        });
        let key = trigger.key();
        self.runtime
            .reset_mode(&(key.0.clone(), key.1.clone(), Mode::Firing));
        self.runtime.set_mode(key, Mode::Firing);
    }
}
