//! Narrow interface to the external definitions store.
//!
//! The engine persists through this trait and keeps its own in-memory view;
//! implementations only need dumb CRUD plus a full startup scan. The default
//! backend is sled (`storage::SledDefinitionsStore`); tests use the
//! in-memory store.

use crate::condition::Condition;
use crate::dampening::Dampening;
use crate::types::{ActionDefinition, ActionPlugin, Mode, Trigger};
use thiserror::Error;

/// Persistence failure, surfaced to callers verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store scan timed out after {0} seconds")]
    Timeout(u64),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Everything the store holds, for the startup scan.
#[derive(Debug, Default, Clone)]
pub struct DefinitionsDump {
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub dampenings: Vec<Dampening>,
    pub plugins: Vec<ActionPlugin>,
    pub actions: Vec<ActionDefinition>,
}

/// CRUD operations on persisted definitions.
///
/// All writes are upserts keyed by the entity's tenant-scoped identity;
/// deletes of absent keys are no-ops (existence checks belong to the
/// registry, which owns validation).
pub trait DefinitionsStore: Send + Sync {
    fn save_trigger(&self, trigger: &Trigger) -> Result<(), StoreError>;
    fn delete_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError>;

    /// Replace the full condition set of one (trigger, mode).
    fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
        conditions: &[Condition],
    ) -> Result<(), StoreError>;
    /// Drop the condition sets of both modes.
    fn delete_conditions(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError>;

    fn save_dampening(&self, dampening: &Dampening) -> Result<(), StoreError>;
    fn delete_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        mode: Mode,
    ) -> Result<(), StoreError>;
    /// Drop the dampenings of both modes.
    fn delete_dampenings(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError>;

    fn save_action_plugin(&self, plugin: &ActionPlugin) -> Result<(), StoreError>;
    fn delete_action_plugin(&self, name: &str) -> Result<(), StoreError>;

    fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError>;
    fn delete_action(
        &self,
        tenant_id: &str,
        plugin: &str,
        action_id: &str,
    ) -> Result<(), StoreError>;

    /// Full scan for registry startup.
    fn load_all(&self) -> Result<DefinitionsDump, StoreError>;

    /// Whether any trigger is persisted (bootstrap suppression check).
    fn has_triggers(&self) -> Result<bool, StoreError>;
}
