//! Processing pipeline: data sources, the ingest handle, and the
//! single-writer processing loop driving the rule engine.

pub mod processing_loop;
pub mod source;

pub use processing_loop::{PipelineStats, ProcessingLoop};
pub use source::{ChannelSource, DataEvent, DataSource, ReplaySource, StdinSource};

use crate::definitions::DefinitionsRegistry;
use crate::types::Data;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("engine is shut down")]
    Closed,
}

/// Push-side handle of the ingest channel.
///
/// `ingest` acknowledges once the batch is enqueued for the engine. Samples
/// whose data id no condition listens on are filtered here (counted), so
/// dead streams never reach the tick.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Vec<Data>>,
    registry: Arc<DefinitionsRegistry>,
    filtered: Arc<AtomicU64>,
}

impl IngestHandle {
    /// Create the ingest channel pair.
    pub fn channel(
        registry: Arc<DefinitionsRegistry>,
        buffer: usize,
        max_batch: usize,
    ) -> (Self, ChannelSource) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                registry,
                filtered: Arc::new(AtomicU64::new(0)),
            },
            ChannelSource::new(rx, max_batch),
        )
    }

    /// Ingest a batch on behalf of `tenant_id`.
    ///
    /// The caller's tenant overwrites whatever the samples carry (trust
    /// boundary at the service edge). Relative order within a data id is
    /// preserved.
    pub async fn ingest(&self, tenant_id: &str, mut batch: Vec<Data>) -> Result<(), IngestError> {
        let active = self.registry.active_snapshot();
        batch.retain_mut(|data| {
            data.tenant_id = tenant_id.to_string();
            if active.watches(&data.tenant_id, &data.id) {
                true
            } else {
                self.filtered.fetch_add(1, Ordering::Relaxed);
                debug!(tenant = tenant_id, data_id = %data.id, "Ingest filtered dead data id");
                false
            }
        });
        if batch.is_empty() {
            return Ok(());
        }
        self.tx.send(batch).await.map_err(|_| IngestError::Closed)
    }

    /// Samples dropped at ingest because no enabled trigger listens.
    pub fn filtered_count(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}
