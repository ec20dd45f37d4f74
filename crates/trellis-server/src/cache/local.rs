//! In-process weight-bounded cache handler.
//!
//! Both caches are LRU by access: `get`, `peek`, `pull`, and `push` all
//! refresh an entry's recency, and inserting past the weight bound evicts
//! least-recently-used entries until the newcomer fits. An entry heavier
//! than the whole bound is not cached at all — correctness never depends on
//! a cache hit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use trellis_core::{Result, Task, TaskId};

use super::{orphan_entry_weight, CacheHandler};
use crate::metrics::ServerMetrics;

/// A weight-bounded map with least-recently-used eviction.
#[derive(Debug)]
struct WeightedLru<V> {
    entries: HashMap<TaskId, (V, usize)>,
    /// Access order, least recently used at the front.
    order: VecDeque<TaskId>,
    weight: usize,
    max_weight: usize,
}

impl<V> WeightedLru<V> {
    fn new(max_weight: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            weight: 0,
            max_weight,
        }
    }

    fn touch(&mut self, id: &TaskId) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
            self.order.push_back(id.clone());
        }
    }

    fn get(&mut self, id: &TaskId) -> Option<&V> {
        if self.entries.contains_key(id) {
            self.touch(id);
        }
        self.entries.get(id).map(|(value, _)| value)
    }

    fn remove(&mut self, id: &TaskId) -> Option<V> {
        let (value, weight) = self.entries.remove(id)?;
        self.weight -= weight;
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
        Some(value)
    }

    /// Inserts `value`, evicting least-recently-used entries until it fits.
    /// Returns the number of entries evicted. A value heavier than the whole
    /// bound is dropped on the floor.
    fn insert(&mut self, id: TaskId, value: V, weight: usize) -> usize {
        self.remove(&id);
        if weight > self.max_weight {
            return 0;
        }

        let mut evicted = 0;
        while self.weight + weight > self.max_weight {
            let Some(oldest) = self.order.front().cloned() else {
                break;
            };
            self.remove(&oldest);
            evicted += 1;
        }

        self.weight += weight;
        self.entries.insert(id.clone(), (value, weight));
        self.order.push_back(id);
        evicted
    }
}

/// In-process [`CacheHandler`] bounded by aggregate entry weight.
#[derive(Debug)]
pub struct LocalCacheHandler {
    tasks: Mutex<WeightedLru<Task>>,
    orphans: Mutex<WeightedLru<Vec<TaskId>>>,
    metrics: ServerMetrics,
}

// Cache state stays internally consistent (weight bookkeeping happens with
// the entry mutation under one guard), so recover from poisoning instead of
// degrading into a permanent miss-everything cache.
fn relock<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl LocalCacheHandler {
    /// Creates a handler with the given weight bounds for the task and
    /// orphan caches.
    #[must_use]
    pub fn new(task_cache_max_weight: usize, orphan_cache_max_weight: usize) -> Self {
        Self {
            tasks: Mutex::new(WeightedLru::new(task_cache_max_weight)),
            orphans: Mutex::new(WeightedLru::new(orphan_cache_max_weight)),
            metrics: ServerMetrics::new(),
        }
    }

    /// Aggregate weight currently held by the orphan cache.
    #[must_use]
    pub fn orphan_cache_weight(&self) -> usize {
        relock(self.orphans.lock()).weight
    }

    /// Number of parent keys currently buffered in the orphan cache.
    #[must_use]
    pub fn orphan_cache_entries(&self) -> usize {
        relock(self.orphans.lock()).entries.len()
    }

    /// Aggregate weight currently held by the task cache.
    #[must_use]
    pub fn task_cache_weight(&self) -> usize {
        relock(self.tasks.lock()).weight
    }

    fn publish_orphan_occupancy(&self, orphans: &WeightedLru<Vec<TaskId>>) {
        self.metrics
            .set_orphan_cache_occupancy(orphans.weight, orphans.entries.len());
    }
}

#[async_trait]
impl CacheHandler for LocalCacheHandler {
    async fn get_tasks(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>> {
        let mut tasks = relock(self.tasks.lock());
        Ok(ids
            .iter()
            .filter_map(|id| tasks.get(id).cloned().map(|task| (id.clone(), task)))
            .collect())
    }

    async fn put_tasks(&self, new_tasks: Vec<Task>) -> Result<()> {
        let mut tasks = relock(self.tasks.lock());
        for task in new_tasks {
            let weight = task.weight();
            tasks.insert(task.id.clone(), task, weight);
        }
        Ok(())
    }

    async fn pull_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>> {
        let mut orphans = relock(self.orphans.lock());
        let pulled = orphans.remove(parent);
        if pulled.is_some() {
            self.publish_orphan_occupancy(&orphans);
        }
        Ok(pulled)
    }

    async fn peek_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>> {
        let mut orphans = relock(self.orphans.lock());
        Ok(orphans.get(parent).cloned())
    }

    async fn push_orphans(&self, parent: &TaskId, children: Vec<TaskId>) -> Result<()> {
        let mut orphans = relock(self.orphans.lock());

        let mut pending = orphans.remove(parent).unwrap_or_default();
        for child in children {
            if !pending.contains(&child) {
                pending.push(child);
            }
        }

        let weight = orphan_entry_weight(parent, &pending);
        let evicted = orphans.insert(parent.clone(), pending, weight);
        if evicted > 0 {
            tracing::warn!(
                parent = %parent,
                evicted,
                "orphan cache over capacity, evicted least recently used entries"
            );
            self.metrics.record_orphan_cache_eviction(evicted);
        }
        self.publish_orphan_occupancy(&orphans);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    #[tokio::test]
    async fn task_cache_misses_are_absent_not_errors() -> Result<()> {
        let cache = LocalCacheHandler::new(1 << 20, 1 << 20);
        cache.put_tasks(vec![Task::new(id("a"))]).await?;

        let found = cache.get_tasks(&[id("a"), id("missing")]).await?;
        assert_eq!(found.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn pull_removes_and_peek_does_not() -> Result<()> {
        let cache = LocalCacheHandler::new(1 << 20, 1 << 20);
        cache
            .push_orphans(&id("parent"), vec![id("child_1"), id("child_2")])
            .await?;

        let peeked = cache.peek_orphans(&id("parent")).await?;
        assert_eq!(peeked.map(|c| c.len()), Some(2));

        let pulled = cache.pull_orphans(&id("parent")).await?;
        assert_eq!(pulled.map(|c| c.len()), Some(2));

        // At most one consumer observes a batch of orphans.
        assert!(cache.pull_orphans(&id("parent")).await?.is_none());
        assert_eq!(cache.orphan_cache_weight(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn push_appends_to_the_pending_set() -> Result<()> {
        let cache = LocalCacheHandler::new(1 << 20, 1 << 20);
        cache.push_orphans(&id("p"), vec![id("c1")]).await?;
        cache.push_orphans(&id("p"), vec![id("c2"), id("c1")]).await?;

        let pulled = cache.pull_orphans(&id("p")).await?.expect("pending set");
        assert_eq!(pulled, vec![id("c1"), id("c2")]);

        Ok(())
    }

    #[tokio::test]
    async fn orphan_weight_never_exceeds_the_bound() -> Result<()> {
        let max_weight = 200;
        let cache = LocalCacheHandler::new(1 << 20, max_weight);

        for i in 0..50 {
            let parent = id(&format!("parent_{i:03}"));
            let children = vec![id(&format!("child_{i:03}_a")), id(&format!("child_{i:03}_b"))];
            cache.push_orphans(&parent, children).await?;
            assert!(
                cache.orphan_cache_weight() <= max_weight,
                "weight {} exceeded bound {max_weight}",
                cache.orphan_cache_weight()
            );
        }

        assert!(cache.orphan_cache_entries() < 50);
        Ok(())
    }

    #[tokio::test]
    async fn eviction_is_least_recently_used_first() -> Result<()> {
        // Each entry weighs 2 * (8 + 10) = 36; three fit in 120, not four.
        let cache = LocalCacheHandler::new(1 << 20, 120);
        cache.push_orphans(&id("parent_a"), vec![id("child_a_01")]).await?;
        cache.push_orphans(&id("parent_b"), vec![id("child_b_01")]).await?;
        cache.push_orphans(&id("parent_c"), vec![id("child_c_01")]).await?;

        // Touch parent_a so parent_b becomes the eviction candidate.
        let _ = cache.peek_orphans(&id("parent_a")).await?;

        cache.push_orphans(&id("parent_d"), vec![id("child_d_01")]).await?;

        assert!(cache.peek_orphans(&id("parent_a")).await?.is_some());
        assert!(cache.peek_orphans(&id("parent_b")).await?.is_none());
        assert!(cache.peek_orphans(&id("parent_d")).await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn task_cache_evicts_by_weight() -> Result<()> {
        let mut heavy = Task::new(id("heavy"));
        heavy
            .texts
            .insert("blob".into(), "x".repeat(4096));
        let bound = heavy.weight() + 8;

        let cache = LocalCacheHandler::new(bound, 1 << 20);
        cache.put_tasks(vec![heavy.clone()]).await?;
        assert_eq!(cache.get_tasks(&[id("heavy")]).await?.len(), 1);

        // A second heavy record forces the first out.
        let mut heavier = Task::new(id("heavier"));
        heavier.texts.insert("blob".into(), "y".repeat(4096));
        cache.put_tasks(vec![heavier]).await?;

        assert!(cache.get_tasks(&[id("heavy")]).await?.is_empty());
        assert!(cache.task_cache_weight() <= bound);

        Ok(())
    }
}
