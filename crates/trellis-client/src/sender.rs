//! Batch transports.
//!
//! A [`EventSender`] delivers one encoded batch to the server. Transports
//! are interchangeable behind the trait: the HTTP sender is the production
//! implementation, and [`RecordingSender`] is an in-process double with
//! scriptable failures for pipeline tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use trellis_core::{Error, EventBatch, Result};

use crate::config::ReporterConfig;

/// A transport capable of delivering one event batch.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Delivers the batch.
    ///
    /// # Errors
    ///
    /// Returns a transport error on network failure or a non-success server
    /// response; such errors are retryable by the caller.
    async fn send(&self, batch: &EventBatch) -> Result<()>;
}

/// HTTP transport: POSTs JSON batches to `{endpoint}/events`.
#[derive(Debug, Clone)]
pub struct HttpEventSender {
    events_url: String,
    client: reqwest::Client,
}

impl HttpEventSender {
    /// Creates an HTTP sender from the reporter configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &ReporterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            events_url: format!("{}/events", config.endpoint.trim_end_matches('/')),
            client,
        })
    }

    /// The URL batches are POSTed to.
    #[must_use]
    pub fn events_url(&self) -> &str {
        &self.events_url
    }
}

#[async_trait]
impl EventSender for HttpEventSender {
    async fn send(&self, batch: &EventBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.events_url)
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::transport(format!("request to {} failed: {e}", self.events_url)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::transport_status(
            format!("server returned {status}: {body}"),
            status.as_u16(),
        ))
    }
}

/// In-process sender double for tests.
///
/// Records delivered batches and the monotonic instants of every attempt;
/// optionally fails the first `n` attempts, or all of them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    delivered: Mutex<Vec<EventBatch>>,
    attempt_times: Mutex<Vec<tokio::time::Instant>>,
    failures_remaining: AtomicU32,
    fail_always: bool,
    attempts: AtomicU32,
}

impl RecordingSender {
    /// A sender that accepts every batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender that fails the first `n` attempts, then accepts.
    #[must_use]
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// A sender that fails every attempt.
    #[must_use]
    pub fn always_failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    /// Batches delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<EventBatch> {
        self.delivered
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// Total attempts observed, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Monotonic instants at which attempts were observed.
    #[must_use]
    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempt_times
            .lock()
            .map(|times| times.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSender for RecordingSender {
    async fn send(&self, batch: &EventBatch) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut times) = self.attempt_times.lock() {
            times.push(tokio::time::Instant::now());
        }

        if self.fail_always {
            return Err(Error::transport("scripted failure"));
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transport_status("scripted 503", 503));
        }

        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(batch.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Event;

    fn batch() -> EventBatch {
        EventBatch::new(vec![Event::start("job_1", "job")])
    }

    #[tokio::test]
    async fn recording_sender_accepts_by_default() {
        let sender = RecordingSender::new();
        sender.send(&batch()).await.expect("send");
        assert_eq!(sender.delivered().len(), 1);
        assert_eq!(sender.attempts(), 1);
    }

    #[tokio::test]
    async fn failing_first_recovers_after_scripted_failures() {
        let sender = RecordingSender::failing_first(2);

        assert!(sender.send(&batch()).await.is_err());
        assert!(sender.send(&batch()).await.is_err());
        assert!(sender.send(&batch()).await.is_ok());

        assert_eq!(sender.attempts(), 3);
        assert_eq!(sender.delivered().len(), 1);
    }

    #[tokio::test]
    async fn always_failing_never_delivers() {
        let sender = RecordingSender::always_failing();
        for _ in 0..4 {
            assert!(sender.send(&batch()).await.is_err());
        }
        assert!(sender.delivered().is_empty());
    }

    #[test]
    fn http_sender_builds_events_url() {
        let config = crate::config::ReporterConfig::new("http://localhost:9000/");
        let sender = HttpEventSender::new(&config).expect("sender");
        assert_eq!(sender.events_url(), "http://localhost:9000/events");
    }
}
