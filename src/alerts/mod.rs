//! Alert persistence interface and lifecycle.

pub mod producer;

pub use producer::AlertProducer;

use crate::definitions::StoreError;
use crate::types::Alert;
use thiserror::Error;

/// Alert lifecycle failure.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found: {tenant_id}/{alert_id}")]
    NotFound { tenant_id: String, alert_id: String },

    #[error("illegal lifecycle transition: {0}")]
    IllegalTransition(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Narrow interface to the external alert store.
///
/// The engine only needs insert, whole-record update and tenant-scoped
/// queries; history/retention policy belongs to the store.
pub trait AlertStore: Send + Sync {
    fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    fn update_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    fn get_alert(&self, tenant_id: &str, alert_id: &str) -> Result<Option<Alert>, StoreError>;
    /// All alerts of one trigger, oldest first.
    fn alerts_for_trigger(
        &self,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, StoreError>;
    /// All alerts of one tenant, oldest first.
    fn all_alerts(&self, tenant_id: &str) -> Result<Vec<Alert>, StoreError>;
}
