//! KLAXON: Telemetry Alerting Engine
//!
//! Multi-tenant trigger evaluation over streaming telemetry.
//!
//! ## Architecture
//!
//! - **Definitions Registry**: in-memory view of triggers, conditions and
//!   dampenings, write-through to a pluggable store, copy-on-publish
//!   snapshots for the matcher
//! - **Rule Engine**: indexed condition matching, multi-condition joins,
//!   per-(trigger, mode) dampening state machines
//! - **Alert Producer**: alert persistence, lifecycle, auto-resolve /
//!   auto-disable / auto-enable handling
//! - **Action Dispatcher**: bounded, best-effort notification fan-out

pub mod actions;
pub mod alerts;
pub mod bootstrap;
pub mod condition;
pub mod config;
pub mod dampening;
pub mod definitions;
pub mod engine;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export engine configuration
pub use config::EngineConfig;

// Re-export commonly used types
pub use types::{
    Alert, AlertStatus, AvailabilityType, Data, DataValue, EventPayload, EventType, MatchPolicy,
    Mode, Severity, Trigger, TriggerType,
};

// Re-export the condition taxonomy
pub use condition::{
    AvailabilityOp, CompareOp, Condition, ConditionEvaluation, ConditionSpec, EvaluationError,
    RangeOp, StringOp,
};

// Re-export dampening
pub use dampening::{Dampening, DampeningType};

// Re-export definitions components
pub use definitions::{
    DefinitionsError, DefinitionsEvent, DefinitionsEventType, DefinitionsListener,
    DefinitionsRegistry, DefinitionsStore, StoreError,
};

// Re-export the engine
pub use engine::external::{ExternalMatcher, ExternalRegistry};
pub use engine::{RuleEngine, TickOutcome};

// Re-export alerting components
pub use actions::{ActionDispatcher, ActionSink, LogSink};
pub use alerts::{AlertProducer, AlertStore};
pub use pipeline::{IngestHandle, ProcessingLoop};
