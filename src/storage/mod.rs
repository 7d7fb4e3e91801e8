//! Store implementations behind the engine's narrow persistence traits.
//!
//! Sled-backed stores are the default collaborators; the in-memory stores
//! back tests and embedded use.

pub mod alerts;
pub mod memory;
pub mod sled_store;

pub use alerts::{MemoryAlertStore, SledAlertStore};
pub use memory::MemoryDefinitionsStore;
pub use sled_store::SledDefinitionsStore;
