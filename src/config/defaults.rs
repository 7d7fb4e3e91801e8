//! Engine-wide default constants.
//!
//! Operator-tunable values live in [`EngineConfig`](super::EngineConfig);
//! these are the fallbacks and fixed sizing knobs.

/// Default on-disk data directory (sled stores + bootstrap files).
pub const DATA_DIR: &str = "./data";

/// Default store namespace. Separate keyspaces let several engines share a
/// data directory without colliding.
pub const KEYSPACE: &str = "klaxon";

/// Bound on the ingest channel between the data source and the engine tick.
pub const INGEST_BUFFER_SIZE: usize = 10_000;

/// Maximum data items drained into a single engine tick.
pub const TICK_BATCH_SIZE: usize = 256;

/// Bound on the action dispatch queue; overflow drops with a counter.
pub const ACTION_QUEUE_CAPACITY: usize = 1_024;

/// Hard timeout for cross-tenant definition scans at startup, seconds.
pub const ADMIN_FETCH_TIMEOUT_SECS: u64 = 60;

/// Bootstrap file names expected in the data directory.
pub const BOOTSTRAP_TRIGGERS: &str = "triggers-data.json";
pub const BOOTSTRAP_CONDITIONS: &str = "conditions-data.json";
pub const BOOTSTRAP_DAMPENING: &str = "dampening-data.json";
pub const BOOTSTRAP_ACTIONS: &str = "actions-data.json";
