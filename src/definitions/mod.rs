//! Trigger/condition/dampening definitions: registry, store interface,
//! change events, and group propagation.

pub mod events;
pub mod groups;
pub mod registry;
pub mod store;

pub use events::{DefinitionsEvent, DefinitionsEventType, DefinitionsListener};
pub use registry::DefinitionsRegistry;
pub use store::{DefinitionsDump, DefinitionsStore, StoreError};

use thiserror::Error;

/// Error taxonomy for definition mutations.
///
/// `Validation` and `IllegalState` mean the operation was not attempted;
/// `Store` surfaces persistence failures verbatim — the operation is
/// aborted and no listener is notified.
#[derive(Debug, Error)]
pub enum DefinitionsError {
    #[error("{entity} not found: {tenant_id}/{id}")]
    NotFound {
        entity: &'static str,
        tenant_id: String,
        id: String,
    },

    #[error("invalid definition: {0}")]
    Validation(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DefinitionsError {
    pub fn not_found(entity: &'static str, tenant_id: &str, id: &str) -> Self {
        Self::NotFound {
            entity,
            tenant_id: tenant_id.to_string(),
            id: id.to_string(),
        }
    }
}
