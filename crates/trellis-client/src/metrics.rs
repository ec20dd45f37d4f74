//! Client-side pipeline metrics.
//!
//! Exposed through the `metrics` facade; install an exporter in the host
//! application to ship them. Recording is a no-op without one, so the
//! reporter can emit unconditionally.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Gauge: events currently buffered in the outgoing queue.
    pub const QUEUE_DEPTH: &str = "trellis_client_queue_depth";
    /// Counter: events dropped at admission (queue full).
    pub const QUEUE_DROPS_TOTAL: &str = "trellis_client_queue_drops_total";
    /// Counter: batch outcomes by result.
    pub const BATCHES_TOTAL: &str = "trellis_client_batches_total";
    /// Counter: events successfully delivered.
    pub const EVENTS_SENT_TOTAL: &str = "trellis_client_events_sent_total";
    /// Counter: individual failed delivery attempts.
    pub const SEND_RETRIES_TOTAL: &str = "trellis_client_send_retries_total";
    /// Histogram: events per sent batch.
    pub const BATCH_SIZE: &str = "trellis_client_batch_size";
}

/// Label keys used across client metrics.
pub mod labels {
    /// Batch outcome: `sent`, `dropped_exhausted`, `dropped_encoding`.
    pub const RESULT: &str = "result";
}

/// Batch outcome label values.
pub mod results {
    /// The batch was delivered.
    pub const SENT: &str = "sent";
    /// The batch was dropped after exhausting all delivery attempts.
    pub const DROPPED_EXHAUSTED: &str = "dropped_exhausted";
    /// The batch could not be encoded and was dropped without retrying.
    pub const DROPPED_ENCODING: &str = "dropped_encoding";
}

/// High-level interface for recording client pipeline metrics.
///
/// Cheap to clone and share across workers.
#[derive(Debug, Clone, Default)]
pub struct ClientMetrics;

impl ClientMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Updates the buffered-events gauge.
    #[allow(clippy::cast_precision_loss)] // Queue depths are small.
    pub fn set_queue_depth(&self, depth: usize) {
        gauge!(names::QUEUE_DEPTH).set(depth as f64);
    }

    /// Records an event dropped at admission.
    pub fn record_queue_drop(&self) {
        counter!(names::QUEUE_DROPS_TOTAL).increment(1);
    }

    /// Records a batch outcome.
    pub fn record_batch(&self, result: &'static str, events: usize) {
        counter!(names::BATCHES_TOTAL, labels::RESULT => result).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!(names::BATCH_SIZE).record(events as f64);
        if result == results::SENT {
            counter!(names::EVENTS_SENT_TOTAL).increment(events as u64);
        }
    }

    /// Records one failed delivery attempt.
    pub fn record_retry(&self) {
        counter!(names::SEND_RETRIES_TOTAL).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_exporter_does_not_panic() {
        let metrics = ClientMetrics::new();
        metrics.set_queue_depth(3);
        metrics.record_queue_drop();
        metrics.record_batch(results::SENT, 10);
        metrics.record_batch(results::DROPPED_EXHAUSTED, 2);
        metrics.record_retry();
    }
}
