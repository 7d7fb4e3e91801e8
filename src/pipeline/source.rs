//! Data source abstraction for telemetry ingestion.
//!
//! Provides a unified trait for reading data batches from different
//! sources: the in-process ingest channel, stdin (JSON lines), and
//! pre-loaded replay batches.

use crate::types::Data;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// Events produced by a data source.
pub enum DataEvent {
    /// A batch of data samples to evaluate in one tick.
    Batch(Vec<Data>),
    /// Source reached end of data (EOF for files/stdin, closed channel for
    /// the ingest handle).
    Eof,
}

/// Trait abstracting where telemetry comes from.
///
/// Implementations handle parsing and pacing internally. The processing
/// loop calls [`next_batch`](DataSource::next_batch) in a select! with
/// cancellation.
#[async_trait]
pub trait DataSource: Send + 'static {
    async fn next_batch(&mut self) -> Result<DataEvent>;

    /// Human-readable name for logging (e.g. "ingest", "stdin", "replay").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Channel Source (ingest API)
// ============================================================================

/// Receives batches pushed through an [`IngestHandle`](super::IngestHandle).
///
/// Consecutive pending batches are coalesced up to `max_batch` items so a
/// burst of small ingest calls becomes one engine tick.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<Data>>,
    max_batch: usize,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Vec<Data>>, max_batch: usize) -> Self {
        Self { rx, max_batch }
    }
}

#[async_trait]
impl DataSource for ChannelSource {
    async fn next_batch(&mut self) -> Result<DataEvent> {
        let Some(mut batch) = self.rx.recv().await else {
            return Ok(DataEvent::Eof);
        };
        while batch.len() < self.max_batch {
            match self.rx.try_recv() {
                Ok(more) => batch.extend(more),
                Err(_) => break,
            }
        }
        Ok(DataEvent::Batch(batch))
    }

    fn source_name(&self) -> &str {
        "ingest"
    }
}

// ============================================================================
// Stdin Source (JSON data samples, one per line)
// ============================================================================

/// Reads JSON-formatted data samples from stdin.
///
/// Used with external feeders: `telemetry-feed | klaxon --stdin`
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(2048),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for StdinSource {
    async fn next_batch(&mut self) -> Result<DataEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(DataEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Data>(line) {
                Ok(data) => return Ok(DataEvent::Batch(vec![data])),
                Err(e) => {
                    tracing::warn!("[StdinSource] Failed to parse data sample: {}", e);
                    // Skip malformed lines and keep reading
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

// ============================================================================
// Replay Source (pre-loaded batches)
// ============================================================================

/// Replays pre-loaded data batches with optional inter-batch delay.
pub struct ReplaySource {
    batches: std::vec::IntoIter<Vec<Data>>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(batches: Vec<Vec<Data>>, delay_ms: u64) -> Self {
        Self {
            batches: batches.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// One sample per batch, from a JSON file holding an array of samples.
    pub fn from_file(path: &Path, delay_ms: u64) -> Result<Self> {
        let samples = load_data_file(path)?;
        Ok(Self::new(samples.into_iter().map(|d| vec![d]).collect(), delay_ms))
    }
}

#[async_trait]
impl DataSource for ReplaySource {
    async fn next_batch(&mut self) -> Result<DataEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.batches.next() {
            Some(batch) => {
                self.yielded_first = true;
                Ok(DataEvent::Batch(batch))
            }
            None => Ok(DataEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

/// Load a JSON array of data samples from disk.
pub fn load_data_file(path: &Path) -> Result<Vec<Data>> {
    let raw = std::fs::read_to_string(path)?;
    let samples: Vec<Data> = serde_json::from_str(&raw)?;
    Ok(samples)
}
