//! JSON bootstrap of initial definitions.
//!
//! On startup the engine optionally seeds the definitions store from JSON
//! files in the data directory: `triggers-data.json`,
//! `conditions-data.json`, `dampening-data.json`, `actions-data.json`.
//! Each file's top level is a mapping with one sequence-valued key.
//! Loading is entity-at-a-time with warn-and-continue; a node joining an
//! already-populated deployment skips bootstrap entirely.

use crate::condition::Condition;
use crate::config::defaults;
use crate::dampening::Dampening;
use crate::definitions::DefinitionsRegistry;
use crate::types::{ActionDefinition, ActionPlugin, Mode, Trigger};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
struct TriggersFile {
    #[serde(default)]
    triggers: Vec<Trigger>,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionsFile {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
struct DampeningFile {
    #[serde(default)]
    dampenings: Vec<Dampening>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionsFile {
    #[serde(default)]
    plugins: Vec<ActionPlugin>,
    #[serde(default)]
    actions: Vec<ActionDefinition>,
}

/// What bootstrap loaded, for the startup log.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub skipped: bool,
    pub triggers: usize,
    pub condition_sets: usize,
    pub dampenings: usize,
    pub plugins: usize,
    pub actions: usize,
}

/// Seed the registry from the data directory, unless it already holds
/// definitions.
pub fn load_initial_data(
    registry: &DefinitionsRegistry,
    data_dir: &Path,
) -> anyhow::Result<BootstrapReport> {
    if !registry.all_triggers().is_empty() {
        info!("Definitions already present — skipping bootstrap");
        return Ok(BootstrapReport {
            skipped: true,
            ..BootstrapReport::default()
        });
    }

    let mut report = BootstrapReport::default();

    let triggers: TriggersFile = read_optional(data_dir, defaults::BOOTSTRAP_TRIGGERS)?;
    for trigger in triggers.triggers {
        let tenant_id = trigger.tenant_id.clone();
        match registry.add_trigger(&tenant_id, trigger) {
            Ok(added) => {
                debug!(tenant = %added.tenant_id, trigger = %added.id, "Bootstrapped trigger");
                report.triggers += 1;
            }
            Err(e) => warn!("Bootstrap trigger rejected: {}", e),
        }
    }

    // Conditions arrive one entity per record; group them back into
    // (trigger, mode) sets, ordered by set index, before replacement.
    let conditions: ConditionsFile = read_optional(data_dir, defaults::BOOTSTRAP_CONDITIONS)?;
    let mut sets: BTreeMap<(String, String, Mode), Vec<Condition>> = BTreeMap::new();
    for condition in conditions.conditions {
        sets.entry((
            condition.tenant_id.clone(),
            condition.trigger_id.clone(),
            condition.trigger_mode,
        ))
        .or_default()
        .push(condition);
    }
    for ((tenant_id, trigger_id, mode), mut set) in sets {
        set.sort_by_key(|c| c.condition_set_index);
        match registry.set_conditions(&tenant_id, &trigger_id, mode, set) {
            Ok(_) => report.condition_sets += 1,
            Err(e) => warn!(
                "Bootstrap conditions rejected for {}/{} {}: {}",
                tenant_id, trigger_id, mode, e
            ),
        }
    }

    let dampenings: DampeningFile = read_optional(data_dir, defaults::BOOTSTRAP_DAMPENING)?;
    for dampening in dampenings.dampenings {
        let tenant_id = dampening.tenant_id.clone();
        match registry.add_dampening(&tenant_id, dampening) {
            Ok(_) => report.dampenings += 1,
            Err(e) => warn!("Bootstrap dampening rejected: {}", e),
        }
    }

    let actions: ActionsFile = read_optional(data_dir, defaults::BOOTSTRAP_ACTIONS)?;
    for plugin in actions.plugins {
        match registry.add_action_plugin(plugin) {
            Ok(()) => report.plugins += 1,
            Err(e) => warn!("Bootstrap action plugin rejected: {}", e),
        }
    }
    for action in actions.actions {
        let tenant_id = action.tenant_id.clone();
        match registry.add_action(&tenant_id, action) {
            Ok(_) => report.actions += 1,
            Err(e) => warn!("Bootstrap action rejected: {}", e),
        }
    }

    info!(
        "Bootstrap complete: {} triggers, {} condition sets, {} dampenings, {} plugins, {} actions",
        report.triggers, report.condition_sets, report.dampenings, report.plugins, report.actions
    );
    Ok(report)
}

/// Parse one bootstrap file; a missing file is an empty default.
fn read_optional<T: Default + serde::de::DeserializeOwned>(
    data_dir: &Path,
    file_name: &str,
) -> anyhow::Result<T> {
    let path = data_dir.join(file_name);
    if !path.exists() {
        debug!("Bootstrap file {} not present — skipping", path.display());
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let parsed = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    info!("Loaded bootstrap file {}", path.display());
    Ok(parsed)
}
