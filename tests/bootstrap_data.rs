//! Bootstrap JSON loading tests.
//!
//! Writes the four bootstrap files into a temp data dir, loads them, and
//! checks the engine actually evaluates the seeded definitions. Also covers
//! bootstrap suppression for already-populated stores.

use klaxon::bootstrap::load_initial_data;
use klaxon::definitions::DefinitionsRegistry;
use klaxon::engine::external::ExternalRegistry;
use klaxon::engine::RuleEngine;
use klaxon::storage::MemoryDefinitionsStore;
use klaxon::types::{Data, Mode, Trigger};
use std::path::Path;
use std::sync::Arc;

fn registry() -> Arc<DefinitionsRegistry> {
    let registry = Arc::new(DefinitionsRegistry::new(Arc::new(
        MemoryDefinitionsStore::default(),
    )));
    registry.load_blocking().unwrap();
    registry
}

fn write_bootstrap_files(dir: &Path) {
    std::fs::write(
        dir.join("triggers-data.json"),
        r#"{
          "triggers": [
            {
              "tenantId": "acme",
              "id": "cpu-high",
              "name": "CPU High",
              "severity": "HIGH",
              "firingMatch": "ALL",
              "tags": {"service": "api"}
            },
            {
              "tenantId": "acme",
              "id": "disk-full",
              "name": "Disk Full",
              "enabled": false
            }
          ]
        }"#,
    )
    .unwrap();

    std::fs::write(
        dir.join("conditions-data.json"),
        r#"{
          "conditions": [
            {
              "tenantId": "acme",
              "triggerId": "cpu-high",
              "triggerMode": "FIRING",
              "conditionSetSize": 1,
              "conditionSetIndex": 1,
              "type": "THRESHOLD",
              "dataId": "host.cpu",
              "op": "GT",
              "threshold": 90.0
            },
            {
              "tenantId": "acme",
              "triggerId": "disk-full",
              "triggerMode": "FIRING",
              "conditionSetSize": 1,
              "conditionSetIndex": 1,
              "type": "THRESHOLD_RANGE",
              "dataId": "host.disk",
              "opLow": "INCLUSIVE",
              "opHigh": "EXCLUSIVE",
              "low": 95.0,
              "high": 100.0,
              "inRange": true
            }
          ]
        }"#,
    )
    .unwrap();

    std::fs::write(
        dir.join("dampening-data.json"),
        r#"{
          "dampenings": [
            {
              "tenantId": "acme",
              "triggerId": "cpu-high",
              "triggerMode": "FIRING",
              "type": "RELAXED_COUNT",
              "evalTrueSetting": 2,
              "evalTotalSetting": 4
            }
          ]
        }"#,
    )
    .unwrap();

    std::fs::write(
        dir.join("actions-data.json"),
        r#"{
          "plugins": [
            {"name": "email", "defaultProperties": {"from": "klaxon@example.com"}}
          ],
          "actions": [
            {
              "tenantId": "acme",
              "actionPlugin": "email",
              "actionId": "notify-ops",
              "properties": {"to": "ops@example.com"}
            }
          ]
        }"#,
    )
    .unwrap();
}

#[test]
fn bootstrap_loads_all_four_files() {
    let dir = tempfile::tempdir().unwrap();
    write_bootstrap_files(dir.path());

    let registry = registry();
    let report = load_initial_data(&registry, dir.path()).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.triggers, 2);
    assert_eq!(report.condition_sets, 2);
    assert_eq!(report.dampenings, 1);
    assert_eq!(report.plugins, 1);
    assert_eq!(report.actions, 1);

    let trigger = registry.get_trigger("acme", "cpu-high").unwrap();
    assert_eq!(trigger.severity, klaxon::types::Severity::High);
    assert_eq!(trigger.tags.get("service").map(String::as_str), Some("api"));

    let dampening = registry.get_dampening("acme", "cpu-high", Mode::Firing).unwrap();
    assert_eq!(dampening.eval_true_setting, 2);
    assert_eq!(dampening.eval_total_setting, 4);

    // Disabled triggers load but stay out of the active set.
    assert!(!registry.get_trigger("acme", "disk-full").unwrap().enabled);
    assert!(!registry.active_snapshot().watches("acme", "host.disk"));
    assert!(registry.active_snapshot().watches("acme", "host.cpu"));
}

#[test]
fn bootstrapped_trigger_evaluates() {
    let dir = tempfile::tempdir().unwrap();
    write_bootstrap_files(dir.path());

    let registry = registry();
    load_initial_data(&registry, dir.path()).unwrap();

    let mut engine =
        RuleEngine::new(Arc::clone(&registry), Arc::new(ExternalRegistry::default()));
    // RELAXED_COUNT(2,4): two breaches fire.
    assert!(engine
        .tick(vec![Data::numeric("acme", "host.cpu", 1, 95.0)])
        .alerts
        .is_empty());
    let outcome = engine.tick(vec![Data::numeric("acme", "host.cpu", 2, 97.0)]);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].trigger.id, "cpu-high");
}

#[test]
fn bootstrap_skipped_when_definitions_exist() {
    let dir = tempfile::tempdir().unwrap();
    write_bootstrap_files(dir.path());

    let registry = registry();
    registry
        .add_trigger("other", Trigger::new("other", "existing", "Existing"))
        .unwrap();

    let report = load_initial_data(&registry, dir.path()).unwrap();
    assert!(report.skipped);
    assert!(registry.get_trigger("acme", "cpu-high").is_err());
}

#[test]
fn bootstrap_missing_files_is_empty_start() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let report = load_initial_data(&registry, dir.path()).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.triggers, 0);
}

#[test]
fn bootstrap_continues_past_bad_entities() {
    let dir = tempfile::tempdir().unwrap();
    // Second trigger is invalid (group + memberOf); first one still loads.
    std::fs::write(
        dir.path().join("triggers-data.json"),
        r#"{
          "triggers": [
            {"tenantId": "acme", "id": "good", "name": "Good"},
            {"tenantId": "acme", "id": "bad", "name": "Bad", "group": true, "memberOf": "x"}
          ]
        }"#,
    )
    .unwrap();

    let registry = registry();
    let report = load_initial_data(&registry, dir.path()).unwrap();
    assert_eq!(report.triggers, 1);
    assert!(registry.get_trigger("acme", "good").is_ok());
    assert!(registry.get_trigger("acme", "bad").is_err());
}
