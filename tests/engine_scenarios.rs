//! End-to-end engine scenarios.
//!
//! Drives the rule engine through the definitions registry exactly as the
//! pipeline does, one batch per tick, and asserts on fired alerts: strict
//! and relaxed dampening, multi-condition joins, group member evaluation,
//! ordering and retraction behavior.

use klaxon::condition::{AvailabilityOp, CompareOp, Condition, ConditionSpec};
use klaxon::dampening::Dampening;
use klaxon::definitions::DefinitionsRegistry;
use klaxon::engine::external::ExternalRegistry;
use klaxon::engine::RuleEngine;
use klaxon::storage::MemoryDefinitionsStore;
use klaxon::types::{AvailabilityType, Data, DataValue, MatchPolicy, Mode, Trigger};
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Arc<DefinitionsRegistry>, RuleEngine) {
    let registry = Arc::new(DefinitionsRegistry::new(Arc::new(
        MemoryDefinitionsStore::default(),
    )));
    registry.load_blocking().unwrap();
    let engine = RuleEngine::new(Arc::clone(&registry), Arc::new(ExternalRegistry::default()));
    (registry, engine)
}

fn gt_threshold(data_id: &str, threshold: f64) -> Condition {
    Condition::new(
        "",
        "",
        Mode::Firing,
        ConditionSpec::Threshold {
            data_id: data_id.to_string(),
            op: CompareOp::Gt,
            threshold,
        },
    )
}

#[test]
fn threshold_strict_fires_on_match() {
    // S1: THRESHOLD(X > 10), default STRICT(1,1,0), one sample of 15.0.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Threshold"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 10.0)])
        .unwrap();

    let outcome = engine.tick(vec![Data::numeric("t1", "X", 1, 15.0)]);
    assert_eq!(outcome.alerts.len(), 1);

    let alert = &outcome.alerts[0];
    assert_eq!(alert.trigger.id, "trig");
    assert_eq!(alert.eval_sets.len(), 1);
    let evaluation = &alert.eval_sets[0][0];
    assert!(evaluation.matched);
    assert_eq!(evaluation.data.value, DataValue::Numeric(15.0));
}

#[test]
fn threshold_strict_no_match_no_alert() {
    // S2: same trigger, sample of 5.0: nothing fires.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Threshold"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 10.0)])
        .unwrap();

    let outcome = engine.tick(vec![Data::numeric("t1", "X", 1, 5.0)]);
    assert!(outcome.alerts.is_empty());
}

#[test]
fn relaxed_count_true_false_true() {
    // S3: RELAXED_COUNT(2,3) over values 1,0,1: the alert lands on the
    // third evaluation and carries the two matching tuples.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Relaxed count"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 0.0)])
        .unwrap();
    registry
        .add_dampening(
            "t1",
            Dampening::for_relaxed_count("t1", "trig", Mode::Firing, 2, 3),
        )
        .unwrap();

    assert!(engine.tick(vec![Data::numeric("t1", "X", 1, 1.0)]).alerts.is_empty());
    assert!(engine.tick(vec![Data::numeric("t1", "X", 2, 0.0)]).alerts.is_empty());
    let outcome = engine.tick(vec![Data::numeric("t1", "X", 3, 1.0)]);
    assert_eq!(outcome.alerts.len(), 1);

    let eval_times: Vec<u64> = outcome.alerts[0]
        .eval_sets
        .iter()
        .map(|set| set[0].eval_time)
        .collect();
    assert_eq!(eval_times, vec![1, 3]);
}

#[test]
fn relaxed_time_window_overflow_resets() {
    // S4: RELAXED_TIME(2, 1000ms), trues at t=0 and t=1500: the window
    // expires before the second true is counted, so nothing fires.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Relaxed time"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 0.0)])
        .unwrap();
    registry
        .add_dampening(
            "t1",
            Dampening::for_relaxed_time("t1", "trig", Mode::Firing, 2, 1000),
        )
        .unwrap();

    assert!(engine.tick(vec![Data::numeric("t1", "X", 0, 1.0)]).alerts.is_empty());
    let outcome = engine.tick(vec![Data::numeric("t1", "X", 1500, 1.0)]);
    assert!(outcome.alerts.is_empty());

    // The second true opened a fresh window; one more inside it fires.
    let outcome = engine.tick(vec![Data::numeric("t1", "X", 2000, 1.0)]);
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn two_condition_all_requires_complete_tuple() {
    // S5: ALL over {THRESHOLD(X > 10), AVAILABILITY(Y DOWN)}, STRICT(1).
    let (registry, mut engine) = setup();
    let mut trigger = Trigger::new("t1", "trig", "Two conditions");
    trigger.firing_match = MatchPolicy::All;
    registry.add_trigger("t1", trigger).unwrap();
    registry
        .set_conditions(
            "t1",
            "trig",
            Mode::Firing,
            vec![
                gt_threshold("X", 10.0),
                Condition::new(
                    "",
                    "",
                    Mode::Firing,
                    ConditionSpec::Availability {
                        data_id: "Y".to_string(),
                        op: AvailabilityOp::Down,
                    },
                ),
            ],
        )
        .unwrap();

    // Both streams in one batch: exactly one alert.
    let outcome = engine.tick(vec![
        Data::numeric("t1", "X", 1, 15.0),
        Data::availability("t1", "Y", 2, AvailabilityType::Down),
    ]);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].eval_sets[0].len(), 2);

    // The numeric stream alone leaves the tuple incomplete.
    let outcome = engine.tick(vec![Data::numeric("t1", "X", 3, 15.0)]);
    assert!(outcome.alerts.is_empty());
}

#[test]
fn group_member_evaluates_group_does_not() {
    // S6: group G with a token THRESHOLD; member M1 bound to mem1.cpu.
    let (registry, mut engine) = setup();
    let mut group = Trigger::new("t1", "G", "Group");
    group.group = true;
    registry.add_trigger("t1", group).unwrap();
    registry
        .set_group_conditions(
            "t1",
            "G",
            Mode::Firing,
            vec![Condition::new(
                "t1",
                "G",
                Mode::Firing,
                ConditionSpec::Threshold {
                    data_id: "$M".to_string(),
                    op: CompareOp::Gt,
                    threshold: 90.0,
                },
            )],
            &HashMap::new(),
        )
        .unwrap();
    registry
        .add_member_trigger(
            "t1",
            "G",
            "M1",
            "Member 1",
            HashMap::new(),
            [("$M".to_string(), "mem1.cpu".to_string())]
                .into_iter()
                .collect(),
        )
        .unwrap();

    let outcome = engine.tick(vec![Data::numeric("t1", "mem1.cpu", 1, 99.0)]);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].trigger.id, "M1");

    // Data addressed at the token id itself matches nothing.
    let outcome = engine.tick(vec![Data::numeric("t1", "$M", 2, 99.0)]);
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.stats.data_dropped, 1);
}

#[test]
fn per_data_id_evaluations_follow_timestamp_order() {
    // Property 8: for the same data id, evaluations reach dampening in
    // ascending timestamp order even when the batch arrives shuffled.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Ordered"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 0.0)])
        .unwrap();
    registry
        .add_dampening("t1", Dampening::for_strict("t1", "trig", Mode::Firing, 4))
        .unwrap();

    let outcome = engine.tick(vec![
        Data::numeric("t1", "X", 40, 1.0),
        Data::numeric("t1", "X", 10, 1.0),
        Data::numeric("t1", "X", 30, 1.0),
        Data::numeric("t1", "X", 20, 1.0),
    ]);
    assert_eq!(outcome.alerts.len(), 1);
    let eval_times: Vec<u64> = outcome.alerts[0]
        .eval_sets
        .iter()
        .map(|set| set[0].eval_time)
        .collect();
    assert_eq!(eval_times, vec![10, 20, 30, 40]);
}

#[test]
fn data_is_retracted_between_ticks() {
    // Property 9: a sample does not survive its tick. A COMPARE condition
    // needs both streams co-present, so split delivery never evaluates.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Compare"))
        .unwrap();
    registry
        .set_conditions(
            "t1",
            "trig",
            Mode::Firing,
            vec![Condition::new(
                "",
                "",
                Mode::Firing,
                ConditionSpec::Compare {
                    data_id: "used".to_string(),
                    op: CompareOp::Gt,
                    data2_id: "total".to_string(),
                    data2_multiplier: 0.9,
                },
            )],
        )
        .unwrap();

    assert!(engine
        .tick(vec![Data::numeric("t1", "used", 1, 95.0)])
        .alerts
        .is_empty());
    assert!(engine
        .tick(vec![Data::numeric("t1", "total", 2, 100.0)])
        .alerts
        .is_empty());

    // Co-present in one tick: evaluates and fires.
    let outcome = engine.tick(vec![
        Data::numeric("t1", "used", 3, 95.0),
        Data::numeric("t1", "total", 4, 100.0),
    ]);
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn same_sample_never_evaluated_twice() {
    // A sample that produced an evaluation is gone next tick: re-firing
    // needs fresh data.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Once"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 10.0)])
        .unwrap();
    registry
        .add_dampening("t1", Dampening::for_strict("t1", "trig", Mode::Firing, 2))
        .unwrap();

    assert!(engine.tick(vec![Data::numeric("t1", "X", 1, 15.0)]).alerts.is_empty());
    // An empty tick re-evaluates nothing.
    assert!(engine.tick(vec![]).alerts.is_empty());
    let outcome = engine.tick(vec![Data::numeric("t1", "X", 2, 15.0)]);
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn tenant_isolation_in_evaluation() {
    // Identical data ids under different tenants never cross.
    let (registry, mut engine) = setup();
    registry
        .add_trigger("t1", Trigger::new("t1", "trig", "Tenant one"))
        .unwrap();
    registry
        .set_conditions("t1", "trig", Mode::Firing, vec![gt_threshold("X", 10.0)])
        .unwrap();

    let outcome = engine.tick(vec![Data::numeric("t2", "X", 1, 15.0)]);
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.stats.data_dropped, 1);

    let outcome = engine.tick(vec![Data::numeric("t1", "X", 2, 15.0)]);
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn string_and_event_conditions_fire() {
    let (registry, mut engine) = setup();
    let mut trigger = Trigger::new("t1", "trig", "Log watcher");
    trigger.firing_match = MatchPolicy::Any;
    registry.add_trigger("t1", trigger).unwrap();
    registry
        .set_conditions(
            "t1",
            "trig",
            Mode::Firing,
            vec![
                Condition::new(
                    "",
                    "",
                    Mode::Firing,
                    ConditionSpec::String {
                        data_id: "app.log".to_string(),
                        op: klaxon::condition::StringOp::Contains,
                        pattern: "OutOfMemory".to_string(),
                        ignore_case: true,
                    },
                ),
                Condition::new(
                    "",
                    "",
                    Mode::Firing,
                    ConditionSpec::Event {
                        data_id: "app.events".to_string(),
                        expression: "category == 'crash'".to_string(),
                    },
                ),
            ],
        )
        .unwrap();

    let mut payload = klaxon::types::EventPayload::default();
    payload.category = "crash".to_string();
    payload.text = "segfault in worker".to_string();

    let outcome = engine.tick(vec![
        Data::text("t1", "app.log", 1, "java.lang.outofmemoryerror: heap"),
        Data::event("t1", "app.events", 2, payload),
    ]);
    assert_eq!(outcome.alerts.len(), 1);
}
