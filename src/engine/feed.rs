use crate::models::FeatureBatch;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bounded single-producer/single-consumer handoff for observation snapshots.
/// A full channel applies backpressure to the producer; the decision loop is
/// never flooded.
pub fn snapshot_channel(
    capacity: usize,
) -> (mpsc::Sender<FeatureBatch>, mpsc::Receiver<FeatureBatch>) {
    mpsc::channel(capacity)
}

/// Reorders out-of-order snapshots by timestamp before the decision cycle
/// sees them.
///
/// Batches sharing a timestamp keep arrival order. Batches older than the
/// last processed timestamp minus the tolerance are dropped outright; late
/// data is never reprocessed.
pub struct IntakeBuffer {
    late_tolerance: Duration,
    pending: BTreeMap<(DateTime<Utc>, u64), FeatureBatch>,
    last_processed: Option<DateTime<Utc>>,
    arrival_seq: u64,
    dropped: u64,
}

impl IntakeBuffer {
    pub fn new(late_tolerance_secs: i64) -> Self {
        Self {
            late_tolerance: Duration::seconds(late_tolerance_secs),
            pending: BTreeMap::new(),
            last_processed: None,
            arrival_seq: 0,
            dropped: 0,
        }
    }

    /// Accept a batch unless it arrives too far behind the last processed
    /// timestamp. Returns whether the batch was kept.
    pub fn push(&mut self, batch: FeatureBatch) -> bool {
        if let Some(last) = self.last_processed {
            if batch.timestamp < last - self.late_tolerance {
                self.dropped += 1;
                warn!(
                    instrument = %batch.instrument,
                    timestamp = %batch.timestamp,
                    last_processed = %last,
                    "dropping late snapshot"
                );
                return false;
            }
        }
        let key = (batch.timestamp, self.arrival_seq);
        self.arrival_seq += 1;
        self.pending.insert(key, batch);
        true
    }

    /// Pop the earliest pending batch and advance the processing watermark.
    pub fn next(&mut self) -> Option<FeatureBatch> {
        let key = *self.pending.keys().next()?;
        let batch = self.pending.remove(&key)?;
        self.last_processed = Some(batch.timestamp);
        debug!(timestamp = %batch.timestamp, pending = self.pending.len(), "dequeued snapshot");
        Some(batch)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
