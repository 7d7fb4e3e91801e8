//! External condition delegation.
//!
//! EXTERNAL conditions are never evaluated by the engine itself: the match
//! verdict comes from a named external system. Systems register here by id;
//! a condition whose system is not registered produces no evaluation.

use crate::condition::{Condition, EvaluationError};
use crate::types::Data;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Verdict provider for one external system.
pub trait ExternalMatcher: Send + Sync {
    /// Evaluate the condition's expression against a data sample.
    fn evaluate(&self, condition: &Condition, data: &Data) -> Result<bool, EvaluationError>;
}

/// Registry of external systems, keyed by `systemId`.
#[derive(Default)]
pub struct ExternalRegistry {
    systems: RwLock<HashMap<String, Arc<dyn ExternalMatcher>>>,
}

impl ExternalRegistry {
    pub fn register(&self, system_id: impl Into<String>, matcher: Arc<dyn ExternalMatcher>) {
        if let Ok(mut systems) = self.systems.write() {
            systems.insert(system_id.into(), matcher);
        }
    }

    pub fn unregister(&self, system_id: &str) {
        if let Ok(mut systems) = self.systems.write() {
            systems.remove(system_id);
        }
    }

    pub fn get(&self, system_id: &str) -> Option<Arc<dyn ExternalMatcher>> {
        self.systems
            .read()
            .ok()
            .and_then(|systems| systems.get(system_id).cloned())
    }
}
