//! Batch sender worker pool.
//!
//! The pool drains the shared [`BoundedEventQueue`] from `num_workers`
//! concurrent workers. Each worker gathers a batch (up to `max_batch_size`
//! events, waiting at most `flush_interval` for more), encodes it once, and
//! delivers it with bounded retries and exponential backoff. Delivery is
//! at-most-once: a batch that exhausts its attempts is dropped and logged at
//! error severity with its full serialized content for offline recovery.
//!
//! Shutdown is cooperative. Workers observe an explicit cancellation flag
//! between work units and inside every sleep; `close` grants a bounded grace
//! period for in-flight sends before aborting stragglers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use trellis_core::EventBatch;

use crate::config::ReporterConfig;
use crate::metrics::{results, ClientMetrics};
use crate::queue::BoundedEventQueue;
use crate::sender::EventSender;

/// Cancellation flag shared between the reporter and its workers.
///
/// Workers check it at the start of every batch cycle and race their sleeps
/// against it, so both the flush-interval wait and backoff sleeps are
/// cancellable.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Returns `false` when the flag
    /// was already set, making shutdown idempotent.
    pub fn set(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Returns true once the flag has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn wait_set(&self) {
        while !self.is_set() {
            self.notify.notified().await;
        }
    }
}

struct WorkerContext {
    queue: Arc<BoundedEventQueue>,
    sender: Arc<dyn EventSender>,
    shutdown: Arc<ShutdownFlag>,
    metrics: ClientMetrics,
    env: Option<String>,
    max_batch_size: usize,
    flush_interval: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

/// Pool of concurrent batch sender workers.
pub struct SenderPool {
    workers: Vec<JoinHandle<()>>,
}

impl SenderPool {
    /// Spawns `num_workers` workers draining `queue` into `sender`.
    #[must_use]
    pub fn spawn(
        queue: Arc<BoundedEventQueue>,
        sender: Arc<dyn EventSender>,
        shutdown: Arc<ShutdownFlag>,
        config: &ReporterConfig,
    ) -> Self {
        let metrics = ClientMetrics::new();
        let workers = (0..config.num_workers)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    queue: Arc::clone(&queue),
                    sender: Arc::clone(&sender),
                    shutdown: Arc::clone(&shutdown),
                    metrics: metrics.clone(),
                    env: config.env.clone(),
                    max_batch_size: config.max_batch_size,
                    flush_interval: config.flush_interval,
                    max_retries: config.max_retries,
                    backoff_base: config.retry_backoff_base,
                };
                tokio::spawn(worker_loop(worker_id, ctx))
            })
            .collect();

        Self { workers }
    }

    /// Waits up to `grace` for workers to finish their in-flight sends, then
    /// aborts whatever is left.
    pub async fn shutdown(self, grace: Duration) {
        let deadline = Instant::now() + grace;
        for mut worker in self.workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                tracing::warn!("sender worker exceeded shutdown grace, aborting");
                worker.abort();
            }
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    tracing::debug!(worker_id, "sender worker started");
    loop {
        if ctx.shutdown.is_set() {
            break;
        }

        let events = gather_batch(&ctx).await;
        if events.is_empty() {
            continue;
        }

        let mut batch = EventBatch::new(events);
        batch.env.clone_from(&ctx.env);
        send_with_retry(&ctx, &batch).await;
    }
    tracing::debug!(worker_id, "sender worker stopped");
}

/// Drains up to `max_batch_size` events, waiting at most `flush_interval`
/// for the batch to fill. Returns whatever accumulated by the deadline.
async fn gather_batch(ctx: &WorkerContext) -> Vec<trellis_core::Event> {
    let deadline = Instant::now() + ctx.flush_interval;
    let mut events = ctx.queue.drain(ctx.max_batch_size);

    while events.len() < ctx.max_batch_size && !ctx.shutdown.is_set() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::select! {
            () = ctx.shutdown.wait_set() => break,
            outcome = tokio::time::timeout(remaining, ctx.queue.wait_for_events()) => {
                if outcome.is_err() {
                    break; // flush interval elapsed
                }
            }
        }
        events.extend(ctx.queue.drain(ctx.max_batch_size - events.len()));
    }

    events
}

async fn send_with_retry(ctx: &WorkerContext, batch: &EventBatch) {
    // Encode once up front: a payload that cannot be serialized will not
    // serialize any better on a retry.
    let payload = match serde_json::to_string(batch) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(events = batch.len(), error = %e, "dropping unencodable batch");
            ctx.metrics.record_batch(results::DROPPED_ENCODING, batch.len());
            return;
        }
    };

    for attempt in 1..=ctx.max_retries {
        match ctx.sender.send(batch).await {
            Ok(()) => {
                tracing::debug!(events = batch.len(), attempt, "batch delivered");
                ctx.metrics.record_batch(results::SENT, batch.len());
                return;
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_retries = ctx.max_retries,
                    error = %e,
                    "batch delivery attempt failed"
                );
                ctx.metrics.record_retry();
            }
        }

        if attempt == ctx.max_retries {
            break;
        }

        let delay = ctx.backoff_base * 2u32.saturating_pow(attempt);
        tokio::select! {
            () = ctx.shutdown.wait_set() => {
                tracing::warn!(events = batch.len(), "shutdown during backoff, abandoning batch");
                ctx.metrics.record_batch(results::DROPPED_EXHAUSTED, batch.len());
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    // At-most-once delivery: surface the full payload so the batch can be
    // recovered offline.
    tracing::error!(
        attempts = ctx.max_retries,
        payload = %payload,
        "dropping batch after exhausting delivery attempts"
    );
    ctx.metrics.record_batch(results::DROPPED_EXHAUSTED, batch.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_set_is_idempotent() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        assert!(flag.set());
        assert!(!flag.set());
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn wait_set_resolves_after_set() {
        let flag = Arc::new(ShutdownFlag::new());
        let waiter = Arc::clone(&flag);
        let handle = tokio::spawn(async move { waiter.wait_set().await });

        tokio::task::yield_now().await;
        flag.set();
        handle.await.expect("waiter completes");
    }

    #[tokio::test]
    async fn wait_set_resolves_immediately_when_already_set() {
        let flag = ShutdownFlag::new();
        flag.set();
        flag.wait_set().await;
    }
}
