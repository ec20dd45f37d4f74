//! End-to-end properties of the queue → sender pool pipeline.
//!
//! These tests run on paused tokio time: backoff sleeps and flush intervals
//! auto-advance, so timing assertions are deterministic.

use std::sync::Arc;
use std::time::Duration;

use trellis_client::{Reporter, ReporterConfig, RecordingSender};
use trellis_core::Event;

fn test_config() -> ReporterConfig {
    ReporterConfig::new("http://unused.invalid")
        .with_env("test")
        .with_num_workers(1)
        .with_max_batch_size(10)
        .with_flush_interval(Duration::from_millis(50))
        .with_max_retries(5)
        .with_retry_backoff_base(Duration::from_millis(100))
        .with_shutdown_grace(Duration::from_millis(800))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn batch_is_delivered_exactly_once_after_transient_failures() {
    let sender = Arc::new(RecordingSender::failing_first(2));
    let reporter = Reporter::with_sender(test_config(), Arc::clone(&sender) as Arc<dyn trellis_client::EventSender>);

    reporter.send(Event::start("job_1", "job"));

    wait_until(|| sender.delivered().len() == 1).await;

    // Two failures then one success, no redelivery afterwards.
    assert_eq!(sender.attempts(), 3);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sender.attempts(), 3);
    assert_eq!(sender.delivered().len(), 1);
    assert_eq!(sender.delivered()[0].env.as_deref(), Some("test"));

    reporter.close().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_are_non_decreasing() {
    let sender = Arc::new(RecordingSender::failing_first(3));
    let reporter = Reporter::with_sender(test_config(), Arc::clone(&sender) as Arc<dyn trellis_client::EventSender>);

    reporter.send(Event::start("job_1", "job"));
    wait_until(|| sender.delivered().len() == 1).await;

    let times = sender.attempt_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0], "backoff must not shrink: {gaps:?}");
    }
    // First retry waits at least one doubled base unit.
    assert!(gaps[0] >= Duration::from_millis(200));

    reporter.close().await;
}

#[tokio::test(start_paused = true)]
async fn batch_is_dropped_after_exactly_max_retries_attempts() {
    let sender = Arc::new(RecordingSender::always_failing());
    let config = test_config().with_max_retries(3);
    let reporter = Reporter::with_sender(config, Arc::clone(&sender) as Arc<dyn trellis_client::EventSender>);

    reporter.send(Event::start("doomed_1", "doomed"));

    wait_until(|| sender.attempts() == 3).await;

    // The batch is never redelivered once dropped.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(sender.attempts(), 3);
    assert!(sender.delivered().is_empty());

    reporter.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_terminal() {
    let sender = Arc::new(RecordingSender::new());
    let reporter = Reporter::with_sender(test_config(), Arc::clone(&sender) as Arc<dyn trellis_client::EventSender>);

    reporter.send(Event::start("job_1", "job"));
    wait_until(|| sender.delivered().len() == 1).await;

    reporter.close().await;
    reporter.close().await;

    // Already-sent batches survive; new sends are dropped, not queued.
    assert_eq!(sender.delivered().len(), 1);
    reporter.send(Event::start("late_1", "late"));
    assert_eq!(reporter.current_buffer_size(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sender.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_after_the_flush_interval() {
    let sender = Arc::new(RecordingSender::new());
    let config = test_config().with_max_batch_size(1000);
    let reporter = Reporter::with_sender(config, Arc::clone(&sender) as Arc<dyn trellis_client::EventSender>);

    reporter.send(Event::start("solo_1", "solo"));

    // Far fewer than max_batch_size events exist; the flush interval must
    // force the partial batch out anyway.
    wait_until(|| sender.delivered().len() == 1).await;
    assert_eq!(sender.delivered()[0].len(), 1);

    reporter.close().await;
}
