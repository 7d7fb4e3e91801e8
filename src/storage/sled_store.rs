//! Sled-backed definitions store.
//!
//! One tree per entity kind within a keyspace. Values are JSON; keys are
//! NUL-joined identity components so prefix scans stay tenant-scoped.

use crate::condition::Condition;
use crate::dampening::Dampening;
use crate::definitions::store::{DefinitionsDump, DefinitionsStore, StoreError};
use crate::types::{ActionDefinition, ActionPlugin, Mode, Trigger};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Key separator. Entity ids are user strings; NUL keeps components
/// unambiguous without escaping.
const SEP: u8 = 0;

fn mode_tag(mode: Mode) -> &'static str {
    match mode {
        Mode::Firing => "F",
        Mode::AutoResolve => "A",
    }
}

fn join_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

pub struct SledDefinitionsStore {
    triggers: sled::Tree,
    conditions: sled::Tree,
    dampenings: sled::Tree,
    plugins: sled::Tree,
    actions: sled::Tree,
}

impl SledDefinitionsStore {
    /// Open the definition trees within the given keyspace.
    pub fn open(db: &sled::Db, keyspace: &str) -> Result<Self, StoreError> {
        Ok(Self {
            triggers: db.open_tree(format!("{}.triggers", keyspace))?,
            conditions: db.open_tree(format!("{}.conditions", keyspace))?,
            dampenings: db.open_tree(format!("{}.dampenings", keyspace))?,
            plugins: db.open_tree(format!("{}.action-plugins", keyspace))?,
            actions: db.open_tree(format!("{}.actions", keyspace))?,
        })
    }

    fn put<T: Serialize>(tree: &sled::Tree, key: Vec<u8>, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        tree.insert(key, bytes)?;
        Ok(())
    }

    fn remove_prefix(tree: &sled::Tree, prefix: Vec<u8>) -> Result<(), StoreError> {
        let keys: Vec<_> = tree
            .scan_prefix(prefix)
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            tree.remove(key)?;
        }
        Ok(())
    }

    /// Deserialize every value in a tree, skipping (and logging) corrupt
    /// rows rather than failing the whole scan.
    fn collect_values<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StoreError> {
        let mut values = Vec::new();
        for row in tree.iter() {
            let (key, value) = row?;
            match serde_json::from_slice::<T>(&value) {
                Ok(parsed) => values.push(parsed),
                Err(e) => warn!(
                    "Skipping corrupt row {:?} in tree {:?}: {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&tree.name()),
                    e
                ),
            }
        }
        Ok(values)
    }
}

impl DefinitionsStore for SledDefinitionsStore {
    fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        Self::put(
            &self.triggers,
            join_key(&[&trigger.tenant_id, &trigger.id]),
            trigger,
        )
    }

    fn delete_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        self.triggers.remove(join_key(&[tenant_id, trigger_id]))?;
        Ok(())
    }

    fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
        conditions: &[Condition],
    ) -> Result<(), StoreError> {
        Self::remove_prefix(
            &self.conditions,
            join_key(&[tenant_id, trigger_id, mode_tag(mode)]),
        )?;
        for condition in conditions {
            let index = format!("{:04}", condition.condition_set_index);
            Self::put(
                &self.conditions,
                join_key(&[tenant_id, trigger_id, mode_tag(mode), &index]),
                condition,
            )?;
        }
        Ok(())
    }

    fn delete_conditions(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        Self::remove_prefix(&self.conditions, join_key(&[tenant_id, trigger_id]))
    }

    fn save_dampening(&self, dampening: &Dampening) -> Result<(), StoreError> {
        Self::put(
            &self.dampenings,
            join_key(&[
                &dampening.tenant_id,
                &dampening.trigger_id,
                mode_tag(dampening.trigger_mode),
            ]),
            dampening,
        )
    }

    fn delete_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
    ) -> Result<(), StoreError> {
        self.dampenings
            .remove(join_key(&[tenant_id, trigger_id, mode_tag(mode)]))?;
        Ok(())
    }

    fn delete_dampenings(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        Self::remove_prefix(&self.dampenings, join_key(&[tenant_id, trigger_id]))
    }

    fn save_action_plugin(&self, plugin: &ActionPlugin) -> Result<(), StoreError> {
        Self::put(&self.plugins, plugin.name.clone().into_bytes(), plugin)
    }

    fn delete_action_plugin(&self, name: &str) -> Result<(), StoreError> {
        self.plugins.remove(name.as_bytes())?;
        Ok(())
    }

    fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError> {
        Self::put(
            &self.actions,
            join_key(&[
                &action.tenant_id,
                &action.action_plugin,
                &action.action_id,
            ]),
            action,
        )
    }

    fn delete_action(
        &self,
        tenant_id: &str,
        plugin: &str,
        action_id: &str,
    ) -> Result<(), StoreError> {
        self.actions
            .remove(join_key(&[tenant_id, plugin, action_id]))?;
        Ok(())
    }

    fn load_all(&self) -> Result<DefinitionsDump, StoreError> {
        Ok(DefinitionsDump {
            triggers: Self::collect_values(&self.triggers)?,
            conditions: Self::collect_values(&self.conditions)?,
            dampenings: Self::collect_values(&self.dampenings)?,
            plugins: Self::collect_values(&self.plugins)?,
            actions: Self::collect_values(&self.actions)?,
        })
    }

    fn has_triggers(&self) -> Result<bool, StoreError> {
        Ok(!self.triggers.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{CompareOp, ConditionSpec};

    fn open_store() -> (tempfile::TempDir, SledDefinitionsStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("defs")).unwrap();
        let store = SledDefinitionsStore::open(&db, "test").unwrap();
        (dir, store)
    }

    #[test]
    fn test_trigger_round_trip() {
        let (_dir, store) = open_store();
        let trigger = Trigger::new("t1", "trig", "Trigger");
        store.save_trigger(&trigger).unwrap();
        assert!(store.has_triggers().unwrap());

        let dump = store.load_all().unwrap();
        assert_eq!(dump.triggers, vec![trigger]);

        store.delete_trigger("t1", "trig").unwrap();
        assert!(!store.has_triggers().unwrap());
    }

    #[test]
    fn test_set_conditions_replaces_whole_mode() {
        let (_dir, store) = open_store();
        let make = |data_id: &str, index: usize, size: usize| {
            let mut c = Condition::new(
                "t1",
                "trig",
                Mode::Firing,
                ConditionSpec::Threshold {
                    data_id: data_id.to_string(),
                    op: CompareOp::Gt,
                    threshold: 1.0,
                },
            );
            c.condition_set_index = index;
            c.condition_set_size = size;
            c
        };

        store
            .set_conditions("t1", "trig", Mode::Firing, &[make("a", 1, 2), make("b", 2, 2)])
            .unwrap();
        assert_eq!(store.load_all().unwrap().conditions.len(), 2);

        // Replacement drops the old set entirely.
        store
            .set_conditions("t1", "trig", Mode::Firing, &[make("c", 1, 1)])
            .unwrap();
        let dump = store.load_all().unwrap();
        assert_eq!(dump.conditions.len(), 1);
        assert_eq!(dump.conditions[0].data_id(), "c");

        // The other mode is untouched by mode-scoped replacement.
        let mut resolve = make("r", 1, 1);
        resolve.trigger_mode = Mode::AutoResolve;
        store
            .set_conditions("t1", "trig", Mode::AutoResolve, &[resolve])
            .unwrap();
        store.set_conditions("t1", "trig", Mode::Firing, &[]).unwrap();
        let dump = store.load_all().unwrap();
        assert_eq!(dump.conditions.len(), 1);
        assert_eq!(dump.conditions[0].trigger_mode, Mode::AutoResolve);
    }

    #[test]
    fn test_dampening_keys_are_mode_scoped() {
        let (_dir, store) = open_store();
        store
            .save_dampening(&Dampening::for_strict("t1", "trig", Mode::Firing, 2))
            .unwrap();
        store
            .save_dampening(&Dampening::for_strict("t1", "trig", Mode::AutoResolve, 1))
            .unwrap();
        assert_eq!(store.load_all().unwrap().dampenings.len(), 2);

        store.delete_dampening("t1", "trig", Mode::Firing).unwrap();
        let dump = store.load_all().unwrap();
        assert_eq!(dump.dampenings.len(), 1);
        assert_eq!(dump.dampenings[0].trigger_mode, Mode::AutoResolve);
    }
}
