//! Shared data structures for the alerting engine
//!
//! This module defines the core entity types flowing through the pipeline:
//! - Triggers (user-defined alert rules, standalone/group/member)
//! - Data (incoming telemetry samples: numeric, availability, string, event)
//! - Alerts (fired records with lifecycle)
//! - Action plugins and action instances (notification bindings)
//!
//! Conditions and dampening live in their own modules (`condition`,
//! `dampening`) since they carry the evaluation logic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tenant identifier. Every entity in the system is scoped to one tenant.
pub type TenantId = String;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Composite key identifying a trigger across tenants.
pub type TriggerKey = (TenantId, String);

// ============================================================================
// Enumerations
// ============================================================================

/// Alert severity assigned by the owning trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Whether a trigger produces lifecycle-bearing alerts or plain events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[default]
    Alert,
    Event,
}

/// How per-index evaluation matches reduce to a single outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPolicy {
    /// Logical AND across the condition set.
    #[default]
    All,
    /// Logical OR across the condition set.
    Any,
}

/// Evaluation mode a trigger is currently running in.
///
/// Each mode owns its own condition set and dampening. A trigger starts in
/// `Firing`; if `auto_resolve` is set it flips to `AutoResolve` after firing
/// and back to `Firing` once the resolve conditions are satisfied.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Firing,
    AutoResolve,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Firing => write!(f, "FIRING"),
            Mode::AutoResolve => write!(f, "AUTORESOLVE"),
        }
    }
}

/// Structural role of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    /// Plain trigger, evaluates data directly.
    Standalone,
    /// Template trigger; never evaluates data, edits propagate to members.
    Group,
    /// Instance of a group bound to concrete data ids.
    Member,
    /// Member detached from its group's edits.
    Orphan,
}

// ============================================================================
// Trigger
// ============================================================================

/// A user-defined alert rule.
///
/// Identity is `(tenant_id, id)` and is stable across edits. The evaluation
/// behavior is carried by the trigger's conditions and dampening, looked up
/// per mode through the definitions registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub tenant_id: TenantId,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub event_category: Option<String>,
    #[serde(default)]
    pub event_text: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub firing_match: MatchPolicy,
    #[serde(default)]
    pub auto_resolve_match: MatchPolicy,
    /// Disable the trigger after it fires, until manually re-enabled.
    #[serde(default)]
    pub auto_disable: bool,
    /// Re-enable a disabled trigger once its open alerts are resolved.
    #[serde(default)]
    pub auto_enable: bool,
    /// After firing, switch to AUTORESOLVE mode instead of re-firing.
    #[serde(default)]
    pub auto_resolve: bool,
    /// When AUTORESOLVE satisfies, transition the trigger's open alerts.
    #[serde(default)]
    pub auto_resolve_alerts: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Action bindings: plugin name -> set of action ids.
    #[serde(default)]
    pub actions: HashMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub member_of: Option<String>,
    #[serde(default)]
    pub orphan: bool,
}

fn default_true() -> bool {
    true
}

impl Trigger {
    /// Create a trigger with defaults for everything but identity and name.
    pub fn new(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            severity: Severity::default(),
            event_category: None,
            event_text: None,
            event_type: EventType::default(),
            firing_match: MatchPolicy::default(),
            auto_resolve_match: MatchPolicy::default(),
            auto_disable: false,
            auto_enable: false,
            auto_resolve: false,
            auto_resolve_alerts: false,
            context: HashMap::new(),
            tags: HashMap::new(),
            actions: HashMap::new(),
            group: false,
            member_of: None,
            orphan: false,
        }
    }

    pub fn key(&self) -> TriggerKey {
        (self.tenant_id.clone(), self.id.clone())
    }

    /// Structural role derived from the group/member/orphan flags.
    pub fn trigger_type(&self) -> TriggerType {
        if self.group {
            TriggerType::Group
        } else if self.member_of.is_some() {
            if self.orphan {
                TriggerType::Orphan
            } else {
                TriggerType::Member
            }
        } else {
            TriggerType::Standalone
        }
    }

    /// Whether this trigger participates in data evaluation.
    ///
    /// Group triggers are templates and never see data; disabled triggers
    /// are kept in the registry but excluded from the active set.
    pub fn is_loadable(&self) -> bool {
        self.enabled && !self.group
    }

    pub fn is_member(&self) -> bool {
        self.member_of.is_some()
    }

    /// Match policy for the given mode.
    pub fn match_policy(&self, mode: Mode) -> MatchPolicy {
        match mode {
            Mode::Firing => self.firing_match,
            Mode::AutoResolve => self.auto_resolve_match,
        }
    }

    /// Structural invariant check. Returns a human-readable violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id.is_empty() {
            return Err("trigger tenantId must be non-empty".into());
        }
        if self.id.is_empty() {
            return Err("trigger id must be non-empty".into());
        }
        if self.group && self.member_of.is_some() {
            return Err(format!(
                "trigger {} cannot be both a group and a member",
                self.id
            ));
        }
        if self.orphan && self.member_of.is_none() {
            return Err(format!("orphan trigger {} must reference a group", self.id));
        }
        Ok(())
    }
}

// ============================================================================
// Data
// ============================================================================

/// Availability state reported by an availability data stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityType {
    Up,
    Down,
    Unknown,
}

impl std::fmt::Display for AvailabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityType::Up => write!(f, "UP"),
            AvailabilityType::Down => write!(f, "DOWN"),
            AvailabilityType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Payload of an event-typed data sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Value carried by a data sample. Closed variant set: the engine dispatches
/// on this tag, there is no open polymorphism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum DataValue {
    Numeric(f64),
    Availability(AvailabilityType),
    Text(String),
    Event(EventPayload),
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Numeric(v) => write!(f, "{}", v),
            DataValue::Availability(a) => write!(f, "{}", a),
            DataValue::Text(s) => write!(f, "{}", s),
            DataValue::Event(e) => write!(f, "[{}] {}", e.category, e.text),
        }
    }
}

/// One telemetry sample.
///
/// For the same `id`, samples are evaluated in ascending timestamp order.
/// Across ids there is no ordering guarantee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    pub tenant_id: TenantId,
    pub id: String,
    /// Milliseconds since epoch (or replay-relative; only ordering matters).
    pub timestamp: u64,
    pub value: DataValue,
}

impl Data {
    pub fn numeric(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        timestamp: u64,
        value: f64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            timestamp,
            value: DataValue::Numeric(value),
        }
    }

    pub fn availability(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        timestamp: u64,
        value: AvailabilityType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            timestamp,
            value: DataValue::Availability(value),
        }
    }

    pub fn text(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        timestamp: u64,
        value: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            timestamp,
            value: DataValue::Text(value.into()),
        }
    }

    pub fn event(
        tenant_id: impl Into<String>,
        id: impl Into<String>,
        timestamp: u64,
        payload: EventPayload,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            id: id.into(),
            timestamp,
            value: DataValue::Event(payload),
        }
    }
}

// ============================================================================
// Alert
// ============================================================================

/// Alert lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    AutoResolved,
}

impl AlertStatus {
    /// Open alerts are the ones auto-resolution and auto-enable act on.
    pub fn is_open(self) -> bool {
        matches!(self, AlertStatus::Open | AlertStatus::Acknowledged)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Open => write!(f, "OPEN"),
            AlertStatus::Acknowledged => write!(f, "ACKNOWLEDGED"),
            AlertStatus::Resolved => write!(f, "RESOLVED"),
            AlertStatus::AutoResolved => write!(f, "AUTO_RESOLVED"),
        }
    }
}

/// A fired alert.
///
/// Carries frozen snapshots of the trigger and the dampening that satisfied,
/// plus the satisfying evaluation tuples (one tuple per firing; each tuple
/// has one entry per condition set index).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub tenant_id: TenantId,
    pub alert_id: String,
    /// Creation time, milliseconds since epoch.
    pub ctime: u64,
    pub severity: Severity,
    pub status: AlertStatus,
    pub trigger: Trigger,
    pub dampening: crate::dampening::Dampening,
    pub eval_sets: Vec<Vec<crate::condition::ConditionEvaluation>>,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub ack_time: Option<u64>,
    #[serde(default)]
    pub resolved_time: Option<u64>,
}

impl Alert {
    pub fn trigger_key(&self) -> TriggerKey {
        (self.tenant_id.clone(), self.trigger.id.clone())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// A notification plugin advertised to the engine.
///
/// The plugin carries the full set of property names with their defaults;
/// concrete actions override a subset of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlugin {
    pub name: String,
    #[serde(default)]
    pub default_properties: HashMap<String, String>,
}

/// A tenant-scoped action instance bound to a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub tenant_id: TenantId,
    pub action_plugin: String,
    pub action_id: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ActionDefinition {
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id.is_empty() {
            return Err("action tenantId must be non-empty".into());
        }
        if self.action_plugin.is_empty() {
            return Err("action plugin must be non-empty".into());
        }
        if self.action_id.is_empty() {
            return Err("action id must be non-empty".into());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
