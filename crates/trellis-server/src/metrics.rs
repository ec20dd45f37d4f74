//! Server-side reconciliation metrics.
//!
//! Exposed through the `metrics` facade. Recording is a no-op until the host
//! installs an exporter, so every component can emit unconditionally.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: events consumed by the reconciliation engine.
    pub const EVENTS_TOTAL: &str = "trellis_server_events_total";
    /// Counter: batches consumed by the reconciliation engine.
    pub const BATCHES_TOTAL: &str = "trellis_server_batches_total";
    /// Histogram: wall-clock seconds spent reconciling one batch.
    pub const RECONCILE_DURATION_SECONDS: &str = "trellis_server_reconcile_duration_seconds";
    /// Counter: task cache lookups by outcome.
    pub const TASK_CACHE_LOOKUPS_TOTAL: &str = "trellis_server_task_cache_lookups_total";
    /// Counter: children buffered while waiting for their parent.
    pub const ORPHANS_BUFFERED_TOTAL: &str = "trellis_server_orphans_buffered_total";
    /// Counter: children released by a parent's arrival.
    pub const ORPHANS_RELEASED_TOTAL: &str = "trellis_server_orphans_released_total";
    /// Counter: orphan cache entries evicted for capacity.
    pub const ORPHAN_CACHE_EVICTIONS_TOTAL: &str = "trellis_server_orphan_cache_evictions_total";
    /// Gauge: aggregate orphan cache weight.
    pub const ORPHAN_CACHE_WEIGHT: &str = "trellis_server_orphan_cache_weight";
    /// Gauge: orphan cache entry count.
    pub const ORPHAN_CACHE_ENTRIES: &str = "trellis_server_orphan_cache_entries";
    /// Counter: events rejected for declaring themselves their own parent.
    pub const SELF_PARENT_REJECTIONS_TOTAL: &str = "trellis_server_self_parent_rejections_total";
}

/// Label keys used across server metrics.
pub mod labels {
    /// Lookup outcome: `hit` or `miss`.
    pub const OUTCOME: &str = "outcome";
}

/// High-level interface for recording reconciliation metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics;

impl ServerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a consumed batch and its events.
    pub fn record_batch(&self, events: usize) {
        counter!(names::BATCHES_TOTAL).increment(1);
        counter!(names::EVENTS_TOTAL).increment(events as u64);
    }

    /// Records the time spent reconciling one batch.
    pub fn observe_reconcile_duration(&self, duration: Duration) {
        histogram!(names::RECONCILE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records task cache lookup outcomes.
    pub fn record_task_cache_lookup(&self, hits: usize, misses: usize) {
        counter!(names::TASK_CACHE_LOOKUPS_TOTAL, labels::OUTCOME => "hit")
            .increment(hits as u64);
        counter!(names::TASK_CACHE_LOOKUPS_TOTAL, labels::OUTCOME => "miss")
            .increment(misses as u64);
    }

    /// Records children buffered into the orphan cache.
    pub fn record_orphans_buffered(&self, count: usize) {
        counter!(names::ORPHANS_BUFFERED_TOTAL).increment(count as u64);
    }

    /// Records children released from the orphan cache.
    pub fn record_orphans_released(&self, count: usize) {
        counter!(names::ORPHANS_RELEASED_TOTAL).increment(count as u64);
    }

    /// Records orphan cache entries evicted for capacity.
    pub fn record_orphan_cache_eviction(&self, entries: usize) {
        counter!(names::ORPHAN_CACHE_EVICTIONS_TOTAL).increment(entries as u64);
    }

    /// Updates the orphan cache occupancy gauges.
    #[allow(clippy::cast_precision_loss)] // Cache weights stay far below 2^52.
    pub fn set_orphan_cache_occupancy(&self, weight: usize, entries: usize) {
        gauge!(names::ORPHAN_CACHE_WEIGHT).set(weight as f64);
        gauge!(names::ORPHAN_CACHE_ENTRIES).set(entries as f64);
    }

    /// Records a self-parent rejection.
    pub fn record_self_parent_rejection(&self) {
        counter!(names::SELF_PARENT_REJECTIONS_TOTAL).increment(1);
    }
}
