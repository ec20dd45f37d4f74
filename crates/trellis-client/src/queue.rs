//! Bounded, non-blocking event queue.
//!
//! The queue is the only structure shared between application threads and
//! the sender pool. Admission never blocks the caller: when the queue is at
//! capacity (by event count or aggregate byte weight) the incoming event is
//! rejected and the queue is left unchanged. Overflow favors recency of
//! in-flight work over completeness, so older buffered events are never
//! evicted to make room.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use trellis_core::Event;

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<Event>,
    weight: usize,
}

/// In-memory holding area for outgoing events, bounded by event count and
/// aggregate weight.
#[derive(Debug)]
pub struct BoundedEventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_events: usize,
    max_weight: usize,
}

impl BoundedEventQueue {
    /// Creates a queue bounded by `max_events` entries and `max_weight`
    /// aggregate event weight.
    #[must_use]
    pub fn new(max_events: usize, max_weight: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_events,
            max_weight,
        }
    }

    // Queue state stays internally consistent across a panicking holder
    // (push + counter update happen together), so recover from poisoning
    // instead of failing admission forever.
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers an event for admission. Never blocks.
    ///
    /// Returns `false` and leaves the queue unchanged when admission would
    /// exceed either bound; the caller decides how to surface the drop.
    #[must_use]
    pub fn offer(&self, event: Event) -> bool {
        let event_weight = event.weight();
        let mut state = self.lock();
        if state.events.len() >= self.max_events
            || state.weight + event_weight > self.max_weight
        {
            return false;
        }
        state.events.push_back(event);
        state.weight += event_weight;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Removes and returns up to `max_batch` events. Non-blocking; returns
    /// an empty vector when nothing is buffered.
    #[must_use]
    pub fn drain(&self, max_batch: usize) -> Vec<Event> {
        let mut state = self.lock();
        let take = max_batch.min(state.events.len());
        let mut drained = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(event) = state.events.pop_front() {
                state.weight = state.weight.saturating_sub(event.weight());
                drained.push(event);
            }
        }
        drained
    }

    /// Current number of buffered events.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().events.len()
    }

    /// Current aggregate weight of buffered events.
    #[must_use]
    pub fn weight(&self) -> usize {
        self.lock().weight
    }

    /// Waits until at least one event has been offered since the last wait.
    ///
    /// Used by sender workers to accumulate a batch without polling; pair
    /// with a timeout for the forced-flush interval.
    pub async fn wait_for_events(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Event;

    fn event(id: &str) -> Event {
        Event::start(id, "job")
    }

    #[test]
    fn capacity_plus_one_offers_yield_exactly_one_rejection() {
        let capacity = 8;
        let queue = BoundedEventQueue::new(capacity, usize::MAX);

        let mut rejected = 0;
        for i in 0..=capacity {
            if !queue.offer(event(&format!("task_{i}"))) {
                rejected += 1;
            }
        }

        assert_eq!(rejected, 1);
        assert_eq!(queue.size(), capacity);
    }

    #[test]
    fn weight_bound_rejects_without_evicting_older_events() {
        let heavy = event("heavy").with_text("blob", "x".repeat(4096));
        let queue = BoundedEventQueue::new(usize::MAX, heavy.weight() + 16);

        assert!(queue.offer(heavy));
        let before = queue.size();
        assert!(!queue.offer(event("late")));
        assert_eq!(queue.size(), before);
    }

    #[test]
    fn drain_returns_fifo_order_and_updates_weight() {
        let queue = BoundedEventQueue::new(16, usize::MAX);
        assert!(queue.offer(event("a")));
        assert!(queue.offer(event("b")));
        assert!(queue.offer(event("c")));

        let drained = queue.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].task_id.as_str(), "a");
        assert_eq!(drained[1].task_id.as_str(), "b");
        assert_eq!(queue.size(), 1);

        let rest = queue.drain(10);
        assert_eq!(rest.len(), 1);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.weight(), 0);
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let queue = BoundedEventQueue::new(4, usize::MAX);
        assert!(queue.drain(10).is_empty());
    }

    #[test]
    fn full_queue_offer_returns_immediately() {
        let queue = BoundedEventQueue::new(1, usize::MAX);
        assert!(queue.offer(event("first")));

        let started = std::time::Instant::now();
        assert!(!queue.offer(event("second")));
        assert!(started.elapsed() < std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_for_events_wakes_on_offer() {
        use std::sync::Arc;

        let queue = Arc::new(BoundedEventQueue::new(4, usize::MAX));
        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            waiter.wait_for_events().await;
            waiter.drain(1)
        });

        tokio::task::yield_now().await;
        assert!(queue.offer(event("wake")));

        let drained = handle.await.expect("waiter task");
        assert_eq!(drained.len(), 1);
    }
}
