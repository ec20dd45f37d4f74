//! The public ingress facade.
//!
//! A [`Reporter`] owns the bounded queue and the sender pool. Its `send` is
//! fire-and-forget: it returns immediately and never errors. A full queue
//! drops the event with a warning; a closed reporter drops silently. All
//! failure classes surface only through logs and metrics.

use std::sync::{Arc, Mutex};

use trellis_core::{Event, Result};

use crate::config::ReporterConfig;
use crate::metrics::ClientMetrics;
use crate::pool::{SenderPool, ShutdownFlag};
use crate::queue::BoundedEventQueue;
use crate::sender::{EventSender, HttpEventSender};

/// Buffered, batching event reporter.
pub struct Reporter {
    queue: Arc<BoundedEventQueue>,
    pool: Mutex<Option<SenderPool>>,
    shutdown: Arc<ShutdownFlag>,
    metrics: ClientMetrics,
    shutdown_grace: std::time::Duration,
}

impl Reporter {
    /// Creates a reporter shipping batches over HTTP to the configured
    /// server.
    ///
    /// # Errors
    ///
    /// Returns a config error when the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: ReporterConfig) -> Result<Self> {
        config.validate()?;
        let sender = Arc::new(HttpEventSender::new(&config)?);
        Ok(Self::with_sender(config, sender))
    }

    /// Creates a reporter over an explicit transport. Used by tests and by
    /// deployments with a custom sender.
    #[must_use]
    pub fn with_sender(config: ReporterConfig, sender: Arc<dyn EventSender>) -> Self {
        let queue = Arc::new(BoundedEventQueue::new(
            config.max_buffer_size,
            config.max_buffer_weight,
        ));
        let shutdown = Arc::new(ShutdownFlag::new());
        let pool = SenderPool::spawn(
            Arc::clone(&queue),
            sender,
            Arc::clone(&shutdown),
            &config,
        );

        Self {
            queue,
            pool: Mutex::new(Some(pool)),
            shutdown,
            metrics: ClientMetrics::new(),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Enqueues an event for delivery. Fire-and-forget: never blocks, never
    /// errors.
    pub fn send(&self, event: Event) {
        if self.shutdown.is_set() {
            tracing::debug!(task_id = %event.task_id, "reporter closed, dropping event");
            return;
        }

        let task_id = event.task_id.clone();
        if self.queue.offer(event) {
            self.metrics.set_queue_depth(self.queue.size());
        } else {
            tracing::warn!(
                %task_id,
                "event dropped, insufficient space in the outgoing queue"
            );
            self.metrics.record_queue_drop();
        }
    }

    /// Number of events currently buffered, for backpressure monitoring.
    #[must_use]
    pub fn current_buffer_size(&self) -> usize {
        self.queue.size()
    }

    /// Closes the reporter: stops accepting events, grants in-flight sends a
    /// bounded grace period, then forces termination.
    ///
    /// Idempotent and terminal; `send` calls after `close` are dropped, not
    /// queued.
    pub async fn close(&self) {
        if !self.shutdown.set() {
            return;
        }
        tracing::info!("shutting down event reporter");

        let pool = self.pool.lock().ok().and_then(|mut slot| slot.take());
        if let Some(pool) = pool {
            pool.shutdown(self.shutdown_grace).await;
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("buffered", &self.queue.size())
            .field("closed", &self.shutdown.is_set())
            .finish()
    }
}
