//! Group trigger propagation.
//!
//! A group trigger is a template: its conditions reference token data ids
//! (e.g. `$M`) that each member resolves to concrete streams. Edits to the
//! group propagate to every non-orphan member, all-or-nothing per
//! operation: every member is validated before anything is written. Orphans
//! are never touched by propagation and may be edited directly.

use super::events::{DefinitionsEvent, DefinitionsEventType};
use super::registry::{mode_key, normalize_conditions, trigger_key, DefinitionsRegistry};
use super::DefinitionsError;
use crate::condition::{Condition, ConditionSpec};
use crate::dampening::Dampening;
use crate::types::{Mode, Trigger};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

impl DefinitionsRegistry {
    // ========================================================================
    // Members
    // ========================================================================

    /// Instantiate a member of a group trigger.
    ///
    /// The member copies the group's attributes and dampenings, and gets the
    /// group's conditions with every token data id substituted through
    /// `data_id_map`. The map's keys must equal the group's token set
    /// (including COMPARE `data2Id` tokens).
    pub fn add_member_trigger(
        &self,
        tenant_id: &str,
        group_id: &str,
        member_id: &str,
        member_name: &str,
        member_context: HashMap<String, String>,
        data_id_map: HashMap<String, String>,
    ) -> Result<Trigger, DefinitionsError> {
        if member_id.is_empty() {
            return Err(DefinitionsError::Validation(
                "member trigger id must be non-empty".into(),
            ));
        }

        let events = {
            let mut cache = self.cache_write();
            let group = cache
                .triggers
                .get(&trigger_key(tenant_id, group_id))
                .ok_or_else(|| DefinitionsError::not_found("group trigger", tenant_id, group_id))?
                .clone();
            if !group.group {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is not a group trigger",
                    group_id
                )));
            }
            if cache
                .triggers
                .contains_key(&trigger_key(tenant_id, member_id))
            {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} already exists for tenant {}",
                    member_id, tenant_id
                )));
            }

            let group_conditions = group_condition_sets(&cache, tenant_id, group_id);
            check_token_coverage(&group_conditions, &data_id_map)?;

            // Member trigger: group attributes, member identity.
            let mut member = group.clone();
            member.id = member_id.to_string();
            member.name = member_name.to_string();
            member.group = false;
            member.member_of = Some(group_id.to_string());
            member.orphan = false;
            if !member_context.is_empty() {
                member.context = member_context;
            }

            self.store.save_trigger(&member)?;
            cache.triggers.insert(member.key(), member.clone());

            for (mode, conditions) in group_conditions {
                let substituted =
                    substitute_conditions(&conditions, member_id, &data_id_map)?;
                let normalized =
                    normalize_conditions(tenant_id, member_id, mode, substituted)?;
                self.apply_conditions_locked(&mut cache, tenant_id, member_id, mode, normalized)?;
            }

            for mode in [Mode::Firing, Mode::AutoResolve] {
                if let Some(dampening) =
                    cache.dampenings.get(&mode_key(tenant_id, group_id, mode))
                {
                    let mut copy = dampening.clone();
                    copy.trigger_id = member_id.to_string();
                    self.apply_dampening_locked(&mut cache, &copy)?;
                }
            }

            self.publish_locked(&cache);
            vec![DefinitionsEvent::new(
                DefinitionsEventType::TriggerCreate,
                tenant_id,
                member_id,
            )]
        };
        self.notify(events);
        debug!(
            tenant = tenant_id,
            group = group_id,
            member = member_id,
            "Member trigger added"
        );
        self.get_trigger(tenant_id, member_id)
    }

    /// Detach a member from group propagation. The orphan keeps its current
    /// definition and becomes directly editable.
    pub fn orphan_member_trigger(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Trigger, DefinitionsError> {
        let (member, event) = {
            let mut cache = self.cache_write();
            let key = trigger_key(tenant_id, member_id);
            let trigger = cache
                .triggers
                .get(&key)
                .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, member_id))?;
            if !trigger.is_member() {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is not a member trigger",
                    member_id
                )));
            }
            if trigger.orphan {
                return Err(DefinitionsError::IllegalState(format!(
                    "member trigger {} is already an orphan",
                    member_id
                )));
            }
            let mut updated = trigger.clone();
            updated.orphan = true;
            self.store.save_trigger(&updated)?;
            cache.triggers.insert(key, updated.clone());
            self.publish_locked(&cache);
            (
                updated,
                DefinitionsEvent::new(DefinitionsEventType::TriggerUpdate, tenant_id, member_id),
            )
        };
        self.notify(vec![event]);
        Ok(member)
    }

    /// Re-attach an orphan, re-synthesizing its definition from the current
    /// group template with the provided data id map.
    pub fn unorphan_member_trigger(
        &self,
        tenant_id: &str,
        member_id: &str,
        member_context: HashMap<String, String>,
        data_id_map: HashMap<String, String>,
    ) -> Result<Trigger, DefinitionsError> {
        let events = {
            let mut cache = self.cache_write();
            let key = trigger_key(tenant_id, member_id);
            let trigger = cache
                .triggers
                .get(&key)
                .ok_or_else(|| DefinitionsError::not_found("trigger", tenant_id, member_id))?
                .clone();
            if !trigger.orphan {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is not an orphan",
                    member_id
                )));
            }
            let group_id = trigger.member_of.clone().ok_or_else(|| {
                DefinitionsError::IllegalState(format!(
                    "orphan trigger {} has no group reference",
                    member_id
                ))
            })?;
            let group = cache
                .triggers
                .get(&trigger_key(tenant_id, &group_id))
                .ok_or_else(|| DefinitionsError::not_found("group trigger", tenant_id, &group_id))?
                .clone();

            let group_conditions = group_condition_sets(&cache, tenant_id, &group_id);
            check_token_coverage(&group_conditions, &data_id_map)?;

            let mut member = group.clone();
            member.id = member_id.to_string();
            member.name = trigger.name.clone();
            member.group = false;
            member.member_of = Some(group_id.clone());
            member.orphan = false;
            member.context = if member_context.is_empty() {
                trigger.context.clone()
            } else {
                member_context
            };

            self.store.save_trigger(&member)?;
            cache.triggers.insert(key, member);

            let mut events = vec![DefinitionsEvent::new(
                DefinitionsEventType::TriggerUpdate,
                tenant_id,
                member_id,
            )];
            for (mode, conditions) in group_conditions {
                let substituted = substitute_conditions(&conditions, member_id, &data_id_map)?;
                let normalized = normalize_conditions(tenant_id, member_id, mode, substituted)?;
                self.apply_conditions_locked(&mut cache, tenant_id, member_id, mode, normalized)?;
            }
            events.push(DefinitionsEvent::new(
                DefinitionsEventType::ConditionChange,
                tenant_id,
                member_id,
            ));

            for mode in [Mode::Firing, Mode::AutoResolve] {
                if let Some(dampening) =
                    cache.dampenings.get(&mode_key(tenant_id, &group_id, mode))
                {
                    let mut copy = dampening.clone();
                    copy.trigger_id = member_id.to_string();
                    self.apply_dampening_locked(&mut cache, &copy)?;
                    events.push(DefinitionsEvent::new(
                        DefinitionsEventType::DampeningChange,
                        tenant_id,
                        member_id,
                    ));
                }
            }

            self.publish_locked(&cache);
            events
        };
        self.notify(events);
        self.get_trigger(tenant_id, member_id)
    }

    // ========================================================================
    // Group edits (propagating)
    // ========================================================================

    /// Propagate a group trigger's shared attributes to its non-orphan
    /// members. Member identity (id, name, context) and the membership
    /// flags are preserved. Called through `update_trigger`.
    pub(super) fn update_group_trigger(
        &self,
        tenant_id: &str,
        group: Trigger,
    ) -> Result<Trigger, DefinitionsError> {
        let events = {
            let mut cache = self.cache_write();
            if !cache.triggers.contains_key(&group.key()) {
                return Err(DefinitionsError::not_found("group trigger", tenant_id, &group.id));
            }
            self.store.save_trigger(&group)?;
            cache.triggers.insert(group.key(), group.clone());

            let mut events = vec![DefinitionsEvent::new(
                DefinitionsEventType::TriggerUpdate,
                tenant_id,
                &group.id,
            )];
            let member_keys: Vec<_> = cache
                .triggers
                .values()
                .filter(|t| {
                    t.tenant_id == tenant_id
                        && t.member_of.as_deref() == Some(group.id.as_str())
                        && !t.orphan
                })
                .map(Trigger::key)
                .collect();
            for key in member_keys {
                let member = match cache.triggers.get(&key) {
                    Some(m) => m,
                    None => continue,
                };
                let mut updated = group.clone();
                updated.id = member.id.clone();
                updated.name = member.name.clone();
                updated.context = member.context.clone();
                updated.group = false;
                updated.member_of = member.member_of.clone();
                updated.orphan = false;
                self.store.save_trigger(&updated)?;
                events.push(DefinitionsEvent::new(
                    DefinitionsEventType::TriggerUpdate,
                    tenant_id,
                    &updated.id,
                ));
                cache.triggers.insert(key, updated);
            }
            self.publish_locked(&cache);
            events
        };
        self.notify(events);
        Ok(group)
    }

    /// Replace a mode's condition set on the group and every non-orphan
    /// member.
    ///
    /// `data_id_member_map` maps each token data id to a per-member
    /// resolution: `token -> (member id -> concrete data id)`. It must cover
    /// every token referenced by the new conditions (including COMPARE
    /// `data2Id`) for every member; validation failures leave nothing
    /// modified. With no non-orphan members the map may be empty.
    pub fn set_group_conditions(
        &self,
        tenant_id: &str,
        group_id: &str,
        mode: Mode,
        conditions: Vec<Condition>,
        data_id_member_map: &HashMap<String, HashMap<String, String>>,
    ) -> Result<Vec<Condition>, DefinitionsError> {
        let (result, events) = {
            let mut cache = self.cache_write();
            let group = cache
                .triggers
                .get(&trigger_key(tenant_id, group_id))
                .ok_or_else(|| DefinitionsError::not_found("group trigger", tenant_id, group_id))?;
            if !group.group {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is not a group trigger",
                    group_id
                )));
            }

            let normalized = normalize_conditions(tenant_id, group_id, mode, conditions)?;
            let tokens = condition_tokens(normalized.iter());

            let member_ids: Vec<String> = cache
                .triggers
                .values()
                .filter(|t| {
                    t.tenant_id == tenant_id
                        && t.member_of.as_deref() == Some(group_id)
                        && !t.orphan
                })
                .map(|t| t.id.clone())
                .collect();

            // Validate the full substitution up front: all-or-nothing.
            let mut member_sets: Vec<(String, Vec<Condition>)> = Vec::new();
            for member_id in &member_ids {
                let mut member_map = HashMap::new();
                for token in &tokens {
                    let resolved = data_id_member_map
                        .get(token)
                        .and_then(|per_member| per_member.get(member_id))
                        .ok_or_else(|| {
                            DefinitionsError::Validation(format!(
                                "dataIdMemberMap is missing token {} for member {}",
                                token, member_id
                            ))
                        })?;
                    member_map.insert(token.clone(), resolved.clone());
                }
                let substituted = substitute_conditions(&normalized, member_id, &member_map)?;
                let member_normalized =
                    normalize_conditions(tenant_id, member_id, mode, substituted)?;
                member_sets.push((member_id.clone(), member_normalized));
            }

            let result =
                self.apply_conditions_locked(&mut cache, tenant_id, group_id, mode, normalized)?;
            let mut events = vec![DefinitionsEvent::new(
                DefinitionsEventType::ConditionChange,
                tenant_id,
                group_id,
            )];
            for (member_id, member_conditions) in member_sets {
                self.apply_conditions_locked(
                    &mut cache,
                    tenant_id,
                    &member_id,
                    mode,
                    member_conditions,
                )?;
                events.push(DefinitionsEvent::new(
                    DefinitionsEventType::ConditionChange,
                    tenant_id,
                    &member_id,
                ));
            }
            self.publish_locked(&cache);
            (result, events)
        };
        self.notify(events);
        Ok(result)
    }

    /// Attach a dampening to the group and every non-orphan member.
    pub fn add_group_dampening(
        &self,
        tenant_id: &str,
        group_id: &str,
        dampening: Dampening,
    ) -> Result<Dampening, DefinitionsError> {
        self.group_dampening_op(tenant_id, group_id, dampening, false)
    }

    /// Replace the group's dampening on the group and every non-orphan
    /// member.
    pub fn update_group_dampening(
        &self,
        tenant_id: &str,
        group_id: &str,
        dampening: Dampening,
    ) -> Result<Dampening, DefinitionsError> {
        self.group_dampening_op(tenant_id, group_id, dampening, true)
    }

    fn group_dampening_op(
        &self,
        tenant_id: &str,
        group_id: &str,
        mut dampening: Dampening,
        expect_existing: bool,
    ) -> Result<Dampening, DefinitionsError> {
        dampening.tenant_id = tenant_id.to_string();
        dampening.trigger_id = group_id.to_string();
        dampening.validate().map_err(DefinitionsError::Validation)?;

        let events = {
            let mut cache = self.cache_write();
            let group = cache
                .triggers
                .get(&trigger_key(tenant_id, group_id))
                .ok_or_else(|| DefinitionsError::not_found("group trigger", tenant_id, group_id))?;
            if !group.group {
                return Err(DefinitionsError::IllegalState(format!(
                    "trigger {} is not a group trigger",
                    group_id
                )));
            }
            let key = mode_key(tenant_id, group_id, dampening.trigger_mode);
            let exists = cache.dampenings.contains_key(&key);
            if expect_existing && !exists {
                return Err(DefinitionsError::not_found("dampening", tenant_id, group_id));
            }
            if !expect_existing && exists {
                return Err(DefinitionsError::IllegalState(format!(
                    "dampening already defined for {}/{} {}",
                    tenant_id, group_id, dampening.trigger_mode
                )));
            }

            self.apply_dampening_locked(&mut cache, &dampening)?;
            let mut events = vec![DefinitionsEvent::new(
                DefinitionsEventType::DampeningChange,
                tenant_id,
                group_id,
            )];
            let member_ids: Vec<String> = cache
                .triggers
                .values()
                .filter(|t| {
                    t.tenant_id == tenant_id
                        && t.member_of.as_deref() == Some(group_id)
                        && !t.orphan
                })
                .map(|t| t.id.clone())
                .collect();
            for member_id in member_ids {
                let mut copy = dampening.clone();
                copy.trigger_id = member_id.clone();
                self.apply_dampening_locked(&mut cache, &copy)?;
                events.push(DefinitionsEvent::new(
                    DefinitionsEventType::DampeningChange,
                    tenant_id,
                    &member_id,
                ));
            }
            self.publish_locked(&cache);
            events
        };
        self.notify(events);
        Ok(dampening)
    }

    /// Remove a mode's dampening from the group and every non-orphan member.
    pub fn remove_group_dampening(
        &self,
        tenant_id: &str,
        group_id: &str,
        mode: Mode,
    ) -> Result<(), DefinitionsError> {
        let events = {
            let mut cache = self.cache_write();
            let key = mode_key(tenant_id, group_id, mode);
            if !cache.dampenings.contains_key(&key) {
                return Err(DefinitionsError::not_found("dampening", tenant_id, group_id));
            }
            self.store.delete_dampening(tenant_id, group_id, mode)?;
            cache.dampenings.remove(&key);

            let mut events = vec![DefinitionsEvent::new(
                DefinitionsEventType::DampeningChange,
                tenant_id,
                group_id,
            )];
            let member_ids: Vec<String> = cache
                .triggers
                .values()
                .filter(|t| {
                    t.tenant_id == tenant_id
                        && t.member_of.as_deref() == Some(group_id)
                        && !t.orphan
                })
                .map(|t| t.id.clone())
                .collect();
            for member_id in member_ids {
                let member_key = mode_key(tenant_id, &member_id, mode);
                if cache.dampenings.remove(&member_key).is_some() {
                    self.store.delete_dampening(tenant_id, &member_id, mode)?;
                    events.push(DefinitionsEvent::new(
                        DefinitionsEventType::DampeningChange,
                        tenant_id,
                        &member_id,
                    ));
                }
            }
            self.publish_locked(&cache);
            events
        };
        self.notify(events);
        Ok(())
    }
}

// ============================================================================
// Token substitution
// ============================================================================

/// The token data ids referenced by a condition set (including COMPARE's
/// second stream).
fn condition_tokens<'a>(conditions: impl Iterator<Item = &'a Condition>) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for condition in conditions {
        tokens.insert(condition.data_id().to_string());
        if let Some(data2) = condition.data2_id() {
            tokens.insert(data2.to_string());
        }
    }
    tokens
}

fn group_condition_sets(
    cache: &super::registry::DefinitionsCache,
    tenant_id: &str,
    group_id: &str,
) -> Vec<(Mode, Vec<Condition>)> {
    [Mode::Firing, Mode::AutoResolve]
        .into_iter()
        .filter_map(|mode| {
            cache
                .conditions
                .get(&mode_key(tenant_id, group_id, mode))
                .map(|set| (mode, set.clone()))
        })
        .collect()
}

/// Require the data id map keys to equal the group's token set exactly.
fn check_token_coverage(
    group_conditions: &[(Mode, Vec<Condition>)],
    data_id_map: &HashMap<String, String>,
) -> Result<(), DefinitionsError> {
    let tokens = condition_tokens(group_conditions.iter().flat_map(|(_, set)| set.iter()));
    let provided: BTreeSet<String> = data_id_map.keys().cloned().collect();
    if tokens != provided {
        let missing: Vec<_> = tokens.difference(&provided).cloned().collect();
        let extra: Vec<_> = provided.difference(&tokens).cloned().collect();
        return Err(DefinitionsError::Validation(format!(
            "dataIdMap keys must equal the group token set (missing: [{}], unexpected: [{}])",
            missing.join(", "),
            extra.join(", ")
        )));
    }
    Ok(())
}

/// Rewrite one condition set for a member by substituting token data ids.
fn substitute_conditions(
    conditions: &[Condition],
    member_id: &str,
    map: &HashMap<String, String>,
) -> Result<Vec<Condition>, DefinitionsError> {
    conditions
        .iter()
        .map(|condition| {
            let mut member_condition = condition.clone();
            member_condition.trigger_id = member_id.to_string();
            member_condition.spec = substitute_spec(&condition.spec, map)?;
            Ok(member_condition)
        })
        .collect()
}

fn resolve<'a>(
    map: &'a HashMap<String, String>,
    token: &str,
) -> Result<&'a String, DefinitionsError> {
    map.get(token).ok_or_else(|| {
        DefinitionsError::Validation(format!("dataIdMap has no entry for token {}", token))
    })
}

fn substitute_spec(
    spec: &ConditionSpec,
    map: &HashMap<String, String>,
) -> Result<ConditionSpec, DefinitionsError> {
    Ok(match spec {
        ConditionSpec::Threshold { data_id, op, threshold } => ConditionSpec::Threshold {
            data_id: resolve(map, data_id)?.clone(),
            op: *op,
            threshold: *threshold,
        },
        ConditionSpec::ThresholdRange {
            data_id,
            op_low,
            op_high,
            low,
            high,
            in_range,
        } => ConditionSpec::ThresholdRange {
            data_id: resolve(map, data_id)?.clone(),
            op_low: *op_low,
            op_high: *op_high,
            low: *low,
            high: *high,
            in_range: *in_range,
        },
        ConditionSpec::Compare {
            data_id,
            op,
            data2_id,
            data2_multiplier,
        } => ConditionSpec::Compare {
            data_id: resolve(map, data_id)?.clone(),
            op: *op,
            data2_id: resolve(map, data2_id)?.clone(),
            data2_multiplier: *data2_multiplier,
        },
        ConditionSpec::String {
            data_id,
            op,
            pattern,
            ignore_case,
        } => ConditionSpec::String {
            data_id: resolve(map, data_id)?.clone(),
            op: *op,
            pattern: pattern.clone(),
            ignore_case: *ignore_case,
        },
        ConditionSpec::Availability { data_id, op } => ConditionSpec::Availability {
            data_id: resolve(map, data_id)?.clone(),
            op: *op,
        },
        ConditionSpec::Event { data_id, expression } => ConditionSpec::Event {
            data_id: resolve(map, data_id)?.clone(),
            expression: expression.clone(),
        },
        // The expression string is token-substituted by literal replacement.
        ConditionSpec::External {
            data_id,
            system_id,
            expression,
        } => {
            let resolved = resolve(map, data_id)?.clone();
            ConditionSpec::External {
                expression: expression.replace(data_id.as_str(), &resolved),
                data_id: resolved,
                system_id: system_id.clone(),
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::CompareOp;
    use crate::storage::MemoryDefinitionsStore;
    use std::sync::Arc;

    fn registry() -> DefinitionsRegistry {
        let registry = DefinitionsRegistry::new(Arc::new(MemoryDefinitionsStore::default()));
        registry.load_blocking().unwrap();
        registry
    }

    fn group_with_threshold(registry: &DefinitionsRegistry) {
        let mut group = Trigger::new("t1", "grp", "Group");
        group.group = true;
        registry.add_trigger("t1", group).unwrap();
        registry
            .set_group_conditions(
                "t1",
                "grp",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "grp",
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
    }

    fn map_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_add_member_substitutes_tokens() {
        let registry = registry();
        group_with_threshold(&registry);

        let member = registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        assert_eq!(member.member_of.as_deref(), Some("grp"));
        assert!(!member.orphan);

        let conditions = registry.get_conditions("t1", "m1", Mode::Firing);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].data_id(), "mem1.cpu");
        assert_eq!(conditions[0].condition_set_size, 1);

        // The group keeps its token-bearing conditions.
        let group_conditions = registry.get_conditions("t1", "grp", Mode::Firing);
        assert_eq!(group_conditions[0].data_id(), "$M");
    }

    #[test]
    fn test_add_member_requires_exact_token_coverage() {
        let registry = registry();
        group_with_threshold(&registry);

        let err = registry
            .add_member_trigger("t1", "grp", "m1", "Member 1", HashMap::new(), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, DefinitionsError::Validation(_)));

        let err = registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu"), ("$X", "mem1.extra")]),
            )
            .unwrap_err();
        assert!(matches!(err, DefinitionsError::Validation(_)));
    }

    #[test]
    fn test_set_group_conditions_propagates_to_members() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m2",
                "Member 2",
                HashMap::new(),
                map_of(&[("$M", "mem2.cpu")]),
            )
            .unwrap();

        let mut member_map = HashMap::new();
        member_map.insert(
            "$M".to_string(),
            map_of(&[("m1", "mem1.cpu"), ("m2", "mem2.cpu")]),
        );
        member_map.insert(
            "$N".to_string(),
            map_of(&[("m1", "mem1.mem"), ("m2", "mem2.mem")]),
        );

        registry
            .set_group_conditions(
                "t1",
                "grp",
                Mode::Firing,
                vec![
                    Condition::new(
                        "t1",
                        "grp",
                        Mode::Firing,
                        ConditionSpec::Threshold {
                            data_id: "$M".to_string(),
                            op: CompareOp::Gt,
                            threshold: 95.0,
                        },
                    ),
                    Condition::new(
                        "t1",
                        "grp",
                        Mode::Firing,
                        ConditionSpec::Compare {
                            data_id: "$M".to_string(),
                            op: CompareOp::Gt,
                            data2_id: "$N".to_string(),
                            data2_multiplier: 0.5,
                        },
                    ),
                ],
                &member_map,
            )
            .unwrap();

        for (member, cpu, mem) in [("m1", "mem1.cpu", "mem1.mem"), ("m2", "mem2.cpu", "mem2.mem")] {
            let conditions = registry.get_conditions("t1", member, Mode::Firing);
            assert_eq!(conditions.len(), 2, "member {} set size", member);
            assert_eq!(conditions[0].data_id(), cpu);
            assert_eq!(conditions[1].data_id(), cpu);
            assert_eq!(conditions[1].data2_id(), Some(mem));
            assert!(conditions.iter().all(|c| c.condition_set_size == 2));
        }
    }

    #[test]
    fn test_set_group_conditions_is_all_or_nothing() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m2",
                "Member 2",
                HashMap::new(),
                map_of(&[("$M", "mem2.cpu")]),
            )
            .unwrap();

        // Map covers m1 but not m2: nothing may change.
        let mut incomplete = HashMap::new();
        incomplete.insert("$M".to_string(), map_of(&[("m1", "mem1.cpu")]));
        let err = registry
            .set_group_conditions(
                "t1",
                "grp",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "grp",
                    Mode::Firing,
                    ConditionSpec::Threshold {
                        data_id: "$M".to_string(),
                        op: CompareOp::Lt,
                        threshold: 1.0,
                    },
                )],
                &incomplete,
            )
            .unwrap_err();
        assert!(matches!(err, DefinitionsError::Validation(_)));

        // Originals intact.
        let conditions = registry.get_conditions("t1", "m2", Mode::Firing);
        assert_eq!(conditions[0].data_id(), "mem2.cpu");
        match &conditions[0].spec {
            ConditionSpec::Threshold { threshold, .. } => assert_eq!(*threshold, 90.0),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_orphan_not_touched_by_propagation() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        registry.orphan_member_trigger("t1", "m1").unwrap();

        let mut member_map = HashMap::new();
        member_map.insert("$M".to_string(), HashMap::new());
        registry
            .set_group_conditions(
                "t1",
                "grp",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "grp",
                    Mode::Firing,
                    ConditionSpec::Threshold {
                        data_id: "$M".to_string(),
                        op: CompareOp::Lt,
                        threshold: 1.0,
                    },
                )],
                &member_map,
            )
            .unwrap();

        // The orphan keeps the old threshold and remains directly editable.
        let conditions = registry.get_conditions("t1", "m1", Mode::Firing);
        match &conditions[0].spec {
            ConditionSpec::Threshold { threshold, .. } => assert_eq!(*threshold, 90.0),
            other => panic!("unexpected condition {:?}", other),
        }
        registry
            .set_conditions(
                "t1",
                "m1",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "m1",
                    Mode::Firing,
                    ConditionSpec::Threshold {
                        data_id: "mem1.cpu".to_string(),
                        op: CompareOp::Gte,
                        threshold: 50.0,
                    },
                )],
            )
            .unwrap();
    }

    #[test]
    fn test_unorphan_resynthesizes_from_group() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        registry.orphan_member_trigger("t1", "m1").unwrap();
        registry
            .set_conditions(
                "t1",
                "m1",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "m1",
                    Mode::Firing,
                    ConditionSpec::Threshold {
                        data_id: "custom.stream".to_string(),
                        op: CompareOp::Lt,
                        threshold: 5.0,
                    },
                )],
            )
            .unwrap();

        let member = registry
            .unorphan_member_trigger(
                "t1",
                "m1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();
        assert!(!member.orphan);
        let conditions = registry.get_conditions("t1", "m1", Mode::Firing);
        assert_eq!(conditions[0].data_id(), "mem1.cpu");
        match &conditions[0].spec {
            ConditionSpec::Threshold { threshold, .. } => assert_eq!(*threshold, 90.0),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_member_direct_edit_rejected() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();

        let member = registry.get_trigger("t1", "m1").unwrap();
        assert!(matches!(
            registry.update_trigger("t1", member).unwrap_err(),
            DefinitionsError::IllegalState(_)
        ));
        assert!(matches!(
            registry
                .set_conditions("t1", "m1", Mode::Firing, vec![])
                .unwrap_err(),
            DefinitionsError::IllegalState(_)
        ));
        assert!(matches!(
            registry
                .add_dampening("t1", Dampening::for_strict("t1", "m1", Mode::Firing, 2))
                .unwrap_err(),
            DefinitionsError::IllegalState(_)
        ));
    }

    #[test]
    fn test_group_update_propagates_attributes() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();

        let mut group = registry.get_trigger("t1", "grp").unwrap();
        group.severity = crate::types::Severity::Critical;
        group.tags.insert("team".to_string(), "sre".to_string());
        registry.update_trigger("t1", group).unwrap();

        let member = registry.get_trigger("t1", "m1").unwrap();
        assert_eq!(member.severity, crate::types::Severity::Critical);
        assert_eq!(member.tags.get("team").map(String::as_str), Some("sre"));
        assert_eq!(member.name, "Member 1");
        assert_eq!(member.member_of.as_deref(), Some("grp"));
    }

    #[test]
    fn test_group_dampening_propagation() {
        let registry = registry();
        group_with_threshold(&registry);
        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$M", "mem1.cpu")]),
            )
            .unwrap();

        registry
            .add_group_dampening(
                "t1",
                "grp",
                Dampening::for_relaxed_count("t1", "grp", Mode::Firing, 2, 4),
            )
            .unwrap();
        let member_dampening = registry.get_dampening("t1", "m1", Mode::Firing).unwrap();
        assert_eq!(member_dampening.eval_true_setting, 2);
        assert_eq!(member_dampening.trigger_id, "m1");

        registry
            .remove_group_dampening("t1", "grp", Mode::Firing)
            .unwrap();
        assert!(registry.get_dampening("t1", "m1", Mode::Firing).is_none());
        assert!(registry.get_dampening("t1", "grp", Mode::Firing).is_none());
    }

    #[test]
    fn test_external_expression_token_substitution() {
        let registry = registry();
        let mut group = Trigger::new("t1", "grp", "Group");
        group.group = true;
        registry.add_trigger("t1", group).unwrap();
        registry
            .set_group_conditions(
                "t1",
                "grp",
                Mode::Firing,
                vec![Condition::new(
                    "t1",
                    "grp",
                    Mode::Firing,
                    ConditionSpec::External {
                        data_id: "$SCORE".to_string(),
                        system_id: "ml-scorer".to_string(),
                        expression: "$SCORE > 0.9".to_string(),
                    },
                )],
                &HashMap::new(),
            )
            .unwrap();

        registry
            .add_member_trigger(
                "t1",
                "grp",
                "m1",
                "Member 1",
                HashMap::new(),
                map_of(&[("$SCORE", "host1.score")]),
            )
            .unwrap();
        let conditions = registry.get_conditions("t1", "m1", Mode::Firing);
        match &conditions[0].spec {
            ConditionSpec::External { data_id, expression, .. } => {
                assert_eq!(data_id, "host1.score");
                assert_eq!(expression, "host1.score > 0.9");
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }
}
