//! Dampening state machine
//!
//! Dampening converts a stream of per-tuple evaluation outcomes into at most
//! one "satisfied" edge per firing. There is at most one dampening per
//! (trigger, mode); when none is defined the engine injects the default
//! STRICT(1,1,0), which fires on the first true evaluation.
//!
//! Window expiry for RELAXED_TIME uses strict inequality (`elapsed > T`
//! expires) and satisfaction uses `elapsed <= T`, checked against the
//! evaluation tuple's data timestamp so replays are deterministic.

use crate::condition::ConditionEvaluation;
use crate::types::{Mode, TenantId};
use serde::{Deserialize, Serialize};

/// Accumulation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DampeningType {
    /// N consecutive true evaluations; any miss resets.
    Strict,
    /// N true evaluations within a window of M total evaluations.
    RelaxedCount,
    /// N true evaluations within T milliseconds of the first true one.
    RelaxedTime,
}

/// Dampening settings plus volatile evaluation state.
///
/// Identity is `(tenant_id, trigger_id, trigger_mode)`. The settings are
/// definition data; the counters, start time, satisfied flag and satisfying
/// tuples are engine-volatile and reset on reload and after each firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dampening {
    pub tenant_id: TenantId,
    pub trigger_id: String,
    #[serde(default)]
    pub trigger_mode: Mode,
    #[serde(rename = "type")]
    pub dampening_type: DampeningType,
    /// True evaluations required to satisfy.
    pub eval_true_setting: u32,
    /// Total-evaluation window for RELAXED_COUNT (equals the true setting
    /// for STRICT).
    #[serde(default)]
    pub eval_total_setting: u32,
    /// Window in milliseconds for RELAXED_TIME.
    #[serde(default)]
    pub eval_time_setting: u64,

    // -- volatile state --
    #[serde(default)]
    pub num_true_evals: u32,
    #[serde(default)]
    pub num_evals: u32,
    /// Data timestamp of the first true evaluation in the current window.
    #[serde(default)]
    pub true_evals_start_time: Option<u64>,
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default)]
    pub satisfying_evals: Vec<Vec<ConditionEvaluation>>,
}

impl Dampening {
    pub fn for_strict(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: Mode,
        num_consecutive_true: u32,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trigger_id: trigger_id.into(),
            trigger_mode,
            dampening_type: DampeningType::Strict,
            eval_true_setting: num_consecutive_true,
            eval_total_setting: num_consecutive_true,
            eval_time_setting: 0,
            num_true_evals: 0,
            num_evals: 0,
            true_evals_start_time: None,
            satisfied: false,
            satisfying_evals: Vec::new(),
        }
    }

    pub fn for_relaxed_count(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: Mode,
        num_true: u32,
        num_total: u32,
    ) -> Self {
        Self {
            dampening_type: DampeningType::RelaxedCount,
            eval_true_setting: num_true,
            eval_total_setting: num_total,
            eval_time_setting: 0,
            ..Self::for_strict(tenant_id, trigger_id, trigger_mode, num_true)
        }
    }

    pub fn for_relaxed_time(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: Mode,
        num_true: u32,
        window_ms: u64,
    ) -> Self {
        Self {
            dampening_type: DampeningType::RelaxedTime,
            eval_true_setting: num_true,
            eval_total_setting: 0,
            eval_time_setting: window_ms,
            ..Self::for_strict(tenant_id, trigger_id, trigger_mode, num_true)
        }
    }

    /// Engine default when a (trigger, mode) defines no dampening.
    pub fn default_strict(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: Mode,
    ) -> Self {
        Self::for_strict(tenant_id, trigger_id, trigger_mode, 1)
    }

    /// Deterministic identifier derived from the dampening's identity.
    pub fn dampening_id(&self) -> String {
        format!("{}-{}-{}", self.tenant_id, self.trigger_id, self.trigger_mode)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id.is_empty() || self.trigger_id.is_empty() {
            return Err("dampening tenantId and triggerId must be non-empty".into());
        }
        if self.eval_true_setting == 0 {
            return Err("evalTrueSetting must be >= 1".into());
        }
        match self.dampening_type {
            DampeningType::Strict => Ok(()),
            DampeningType::RelaxedCount => {
                if self.eval_total_setting <= self.eval_true_setting {
                    Err("RELAXED_COUNT requires evalTotalSetting > evalTrueSetting".into())
                } else {
                    Ok(())
                }
            }
            DampeningType::RelaxedTime => {
                if self.eval_time_setting == 0 {
                    Err("RELAXED_TIME requires evalTimeSetting > 0".into())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Advance the state machine with one evaluation tuple.
    ///
    /// `true_eval` is the tuple's match outcome reduced under the trigger's
    /// match policy; `now` is the tuple's max data timestamp. After this
    /// returns, `satisfied` reports whether the dampening fired; the caller
    /// takes the satisfying tuples and calls [`reset`](Self::reset).
    pub fn perform(&mut self, true_eval: bool, tuple: Vec<ConditionEvaluation>, now: u64) {
        match self.dampening_type {
            DampeningType::Strict => self.perform_strict(true_eval, tuple),
            DampeningType::RelaxedCount => self.perform_relaxed_count(true_eval, tuple),
            DampeningType::RelaxedTime => self.perform_relaxed_time(true_eval, tuple, now),
        }
    }

    fn perform_strict(&mut self, true_eval: bool, tuple: Vec<ConditionEvaluation>) {
        self.num_evals += 1;
        if !true_eval {
            self.reset();
            return;
        }
        self.num_true_evals += 1;
        self.satisfying_evals.push(tuple);
        if self.num_true_evals == self.eval_true_setting {
            self.satisfied = true;
        }
    }

    fn perform_relaxed_count(&mut self, true_eval: bool, tuple: Vec<ConditionEvaluation>) {
        self.num_evals += 1;
        if true_eval {
            self.num_true_evals += 1;
            self.satisfying_evals.push(tuple);
            if self.num_true_evals == self.eval_true_setting {
                self.satisfied = true;
                return;
            }
        }
        // Not enough chances left in the window to still satisfy.
        let missing = i64::from(self.eval_true_setting) - i64::from(self.num_true_evals);
        let remaining = i64::from(self.eval_total_setting) - i64::from(self.num_evals);
        if missing > remaining {
            self.reset();
        }
    }

    fn perform_relaxed_time(&mut self, true_eval: bool, tuple: Vec<ConditionEvaluation>, now: u64) {
        if let Some(start) = self.true_evals_start_time {
            if now.saturating_sub(start) > self.eval_time_setting {
                self.reset();
            }
        }
        self.num_evals += 1;
        if true_eval {
            self.num_true_evals += 1;
            self.satisfying_evals.push(tuple);
            let start = *self.true_evals_start_time.get_or_insert(now);
            if self.num_true_evals == self.eval_true_setting
                && now.saturating_sub(start) <= self.eval_time_setting
            {
                self.satisfied = true;
            }
        }
    }

    /// Clear all volatile state: counters, window start, satisfied flag and
    /// satisfying tuples.
    pub fn reset(&mut self) {
        self.num_true_evals = 0;
        self.num_evals = 0;
        self.true_evals_start_time = None;
        self.satisfied = false;
        self.satisfying_evals.clear();
    }

    /// Take the satisfying tuples, leaving the state otherwise untouched.
    pub fn take_satisfying_evals(&mut self) -> Vec<Vec<ConditionEvaluation>> {
        std::mem::take(&mut self.satisfying_evals)
    }

    /// A copy with volatile state cleared, for snapshotting into alerts.
    pub fn settings_snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.reset();
        copy
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{CompareOp, Condition, ConditionEvaluation, ConditionSpec};
    use crate::types::Data;

    fn tuple(ts: u64, matched: bool) -> Vec<ConditionEvaluation> {
        let condition = Condition::new(
            "t1",
            "trig",
            Mode::Firing,
            ConditionSpec::Threshold {
                data_id: "X".to_string(),
                op: CompareOp::Gt,
                threshold: 0.0,
            },
        );
        let data = Data::numeric("t1", "X", ts, if matched { 1.0 } else { -1.0 });
        vec![ConditionEvaluation::new(condition, data, None, matched)]
    }

    #[test]
    fn test_strict_fires_on_consecutive_trues() {
        let mut d = Dampening::for_strict("t1", "trig", Mode::Firing, 2);
        d.perform(true, tuple(1, true), 1);
        assert!(!d.satisfied);
        d.perform(true, tuple(2, true), 2);
        assert!(d.satisfied);
        assert_eq!(d.satisfying_evals.len(), 2);
    }

    #[test]
    fn test_strict_single_miss_resets_progress() {
        let mut d = Dampening::for_strict("t1", "trig", Mode::Firing, 2);
        d.perform(true, tuple(1, true), 1);
        d.perform(false, tuple(2, false), 2);
        assert_eq!(d.num_true_evals, 0);
        assert!(d.satisfying_evals.is_empty());
        d.perform(true, tuple(3, true), 3);
        assert!(!d.satisfied);
        d.perform(true, tuple(4, true), 4);
        assert!(d.satisfied);
    }

    #[test]
    fn test_strict_default_fires_immediately() {
        let mut d = Dampening::default_strict("t1", "trig", Mode::Firing);
        d.perform(true, tuple(1, true), 1);
        assert!(d.satisfied);
    }

    #[test]
    fn test_relaxed_count_true_false_true() {
        // N=2 within M=3: T,F,T satisfies on the third evaluation.
        let mut d = Dampening::for_relaxed_count("t1", "trig", Mode::Firing, 2, 3);
        d.perform(true, tuple(1, true), 1);
        assert!(!d.satisfied);
        d.perform(false, tuple(2, false), 2);
        assert!(!d.satisfied);
        assert_eq!(d.num_true_evals, 1, "one false must not reset relaxed count");
        d.perform(true, tuple(3, true), 3);
        assert!(d.satisfied);
    }

    #[test]
    fn test_relaxed_count_resets_when_window_exhausted() {
        // N=2 within M=3: after two falses, 2 trues can no longer fit.
        let mut d = Dampening::for_relaxed_count("t1", "trig", Mode::Firing, 2, 3);
        d.perform(false, tuple(1, false), 1);
        assert_eq!(d.num_evals, 1);
        d.perform(false, tuple(2, false), 2);
        // (2 - 0) > (3 - 2) -> reset.
        assert_eq!(d.num_evals, 0);
        d.perform(true, tuple(3, true), 3);
        d.perform(true, tuple(4, true), 4);
        assert!(d.satisfied);
    }

    #[test]
    fn test_relaxed_time_within_window() {
        let mut d = Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 1000);
        d.perform(true, tuple(0, true), 0);
        assert!(!d.satisfied);
        d.perform(true, tuple(500, true), 500);
        assert!(d.satisfied);
    }

    #[test]
    fn test_relaxed_time_expiry_resets_before_counting() {
        // Second true arrives after the window: no satisfaction, and the
        // second true starts a fresh window.
        let mut d = Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 1000);
        d.perform(true, tuple(0, true), 0);
        d.perform(true, tuple(1500, true), 1500);
        assert!(!d.satisfied);
        assert_eq!(d.num_true_evals, 1);
        assert_eq!(d.true_evals_start_time, Some(1500));
    }

    #[test]
    fn test_relaxed_time_boundary_is_inclusive() {
        // elapsed == T satisfies; expiry requires elapsed > T.
        let mut d = Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 1000);
        d.perform(true, tuple(0, true), 0);
        d.perform(true, tuple(1000, true), 1000);
        assert!(d.satisfied);
    }

    #[test]
    fn test_relaxed_time_start_at_timestamp_zero() {
        // A data timestamp of 0 must still establish the window start.
        let mut d = Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 1000);
        d.perform(true, tuple(0, true), 0);
        assert_eq!(d.true_evals_start_time, Some(0));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut d = Dampening::for_strict("t1", "trig", Mode::Firing, 1);
        d.perform(true, tuple(1, true), 1);
        assert!(d.satisfied);
        d.reset();
        assert_eq!(d.num_true_evals, 0);
        assert_eq!(d.num_evals, 0);
        assert!(!d.satisfied);
        assert!(d.satisfying_evals.is_empty());
        assert!(d.true_evals_start_time.is_none());
    }

    #[test]
    fn test_validation() {
        let d = Dampening::for_relaxed_count("t1", "trig", Mode::Firing, 2, 2);
        assert!(d.validate().is_err());
        let d = Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 0);
        assert!(d.validate().is_err());
        let mut d = Dampening::for_strict("t1", "trig", Mode::Firing, 0);
        assert!(d.validate().is_err());
        d.eval_true_setting = 3;
        d.eval_total_setting = 3;
        assert!(d.validate().is_ok());
    }
}
