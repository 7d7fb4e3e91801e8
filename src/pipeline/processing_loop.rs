//! Unified batch processing loop.
//!
//! Owns the rule engine (single writer) and the alert producer. Every
//! source — ingest channel, stdin, replay — feeds the same
//! batch -> tick -> publish sequence until EOF or cancellation.

use super::source::{DataEvent, DataSource};
use crate::alerts::AlertProducer;
use crate::engine::RuleEngine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counters accumulated over one processing-loop run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub batches: u64,
    pub data_items: u64,
    pub data_dropped: u64,
    pub evaluations: u64,
    pub alerts_fired: u64,
    pub auto_resolutions: u64,
    pub evaluation_errors: u64,
}

/// Owns all state needed for the processing loop.
pub struct ProcessingLoop {
    engine: RuleEngine,
    producer: AlertProducer,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(engine: RuleEngine, producer: AlertProducer, cancel_token: CancellationToken) -> Self {
        Self {
            engine,
            producer,
            cancel_token,
        }
    }

    /// Run until the source is exhausted or cancellation.
    ///
    /// Returns final pipeline statistics.
    pub async fn run<S: DataSource>(mut self, source: &mut S) -> PipelineStats {
        let mut stats = PipelineStats::default();

        info!("📊 Processing telemetry from {}...", source.source_name());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[Pipeline] Shutdown signal received");
                    break;
                }
                result = source.next_batch() => {
                    match result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("[Pipeline] Source error: {}", e);
                            break;
                        }
                    }
                }
            };

            let batch = match event {
                DataEvent::Batch(batch) => batch,
                DataEvent::Eof => {
                    info!(
                        "[Pipeline] Source reached end ({} batches processed)",
                        stats.batches
                    );
                    break;
                }
            };

            stats.batches += 1;
            stats.data_items += batch.len() as u64;

            let outcome = self.engine.tick(batch);
            stats.data_dropped += outcome.stats.data_dropped;
            stats.evaluations += outcome.stats.evaluations;
            stats.evaluation_errors += outcome.stats.evaluation_errors;
            stats.alerts_fired += outcome.alerts.len() as u64;
            stats.auto_resolutions += outcome.auto_resolutions.len() as u64;

            self.producer.publish(&outcome);

            // Progress indicator every 100 quiet batches
            if outcome.alerts.is_empty() && stats.batches % 100 == 0 {
                info!(
                    "📈 Progress: {} batches | {} samples | Alerts: {}",
                    stats.batches, stats.data_items, stats.alerts_fired
                );
            }
        }

        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 FINAL STATISTICS");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("   Batches Processed:    {}", stats.batches);
        info!("   Data Samples:         {}", stats.data_items);
        info!("   Dropped (unwatched):  {}", stats.data_dropped);
        info!("   Evaluations:          {}", stats.evaluations);
        info!("   Evaluation Errors:    {}", stats.evaluation_errors);
        info!("   Alerts Fired:         {}", stats.alerts_fired);
        info!("   Auto-Resolutions:     {}", stats.auto_resolutions);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        stats
    }
}
