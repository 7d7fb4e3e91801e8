//! Engine Configuration Module
//!
//! Process-level configuration loaded from TOML files, with CLI overrides
//! applied in `main` before freezing.
//!
//! ## Loading Order
//!
//! 1. `KLAXON_CONFIG` environment variable (path to TOML file)
//! 2. `klaxon.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(EngineConfig::load());
//!
//! // Anywhere in the codebase:
//! let batch = config::get().tick_batch_size;
//! ```

mod engine_config;
pub mod defaults;

pub use engine_config::EngineConfig;

use std::sync::OnceLock;

/// Global engine configuration, initialized once at startup.
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global engine configuration.
///
/// Falls back to defaults when `init()` has not been called, so library
/// consumers and tests work without explicit setup.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG.get_or_init(EngineConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
