//! The reconciliation engine.
//!
//! Consumes batches of events and merges each into its task record,
//! resolving parent/child linkage as parents become known. Events may arrive
//! in any order: a child observed before its parent is buffered in the
//! orphan cache and released transitively once the parent resolves.
//!
//! ## Concurrency
//!
//! Batches may be reconciled concurrently. Mutations are serialized per task
//! id through a sharded keyed lock, so no two in-flight events interleave
//! their load/merge/persist for the same id; work on distinct ids proceeds
//! in parallel. At most one lock is held at a time (cascades release the
//! parent's lock before touching a child), which rules out lock cycles.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use trellis_core::{Error, Event, EventBatch, Result, Task, TaskId, TrimPolicy};

use crate::cache::CacheHandler;
use crate::metrics::ServerMetrics;
use crate::store::TaskStore;

/// Default bound on individual store/cache calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK_SHARDS: usize = 64;

/// Sharded per-id mutation locks.
///
/// Two ids may share a shard (false sharing costs a little parallelism,
/// never correctness), but one id always maps to one shard, which is what
/// per-id serialization requires.
#[derive(Debug)]
struct IdLocks {
    shards: Vec<tokio::sync::Mutex<()>>,
}

impl IdLocks {
    fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards).map(|_| tokio::sync::Mutex::new(())).collect(),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // Shard index is modular anyway.
    async fn acquire(&self, id: &TaskId) -> tokio::sync::MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.shards.len();
        self.shards[shard].lock().await
    }
}

/// Outcome counters for one reconciled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// Events consumed.
    pub events: usize,
    /// Tasks created by this batch.
    pub created: usize,
    /// Existing tasks mutated by this batch.
    pub updated: usize,
    /// Children buffered while waiting for their parent.
    pub orphans_buffered: usize,
    /// Children released by parents resolved in this batch.
    pub orphans_released: usize,
    /// Events whose self-parent linkage was rejected.
    pub rejected_self_parent: usize,
}

/// Merges event batches into persisted task records.
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn CacheHandler>,
    trim: TrimPolicy,
    metrics: ServerMetrics,
    id_locks: IdLocks,
    call_timeout: Duration,
}

impl Reconciler {
    /// Creates an engine over the given store and cache handler.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, cache: Arc<dyn CacheHandler>) -> Self {
        Self {
            store,
            cache,
            trim: TrimPolicy::default(),
            metrics: ServerMetrics::new(),
            id_locks: IdLocks::new(LOCK_SHARDS),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the attribute trimming policy.
    #[must_use]
    pub fn with_trim_policy(mut self, trim: TrimPolicy) -> Self {
        self.trim = trim;
        self
    }

    /// Bounds individual store/cache calls.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Reconciles one batch, in batch order.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable store fails or times out; cache
    /// failures degrade to misses and are only logged.
    #[tracing::instrument(skip(self, batch), fields(env = batch.env.as_deref().unwrap_or("-"), events = batch.len()))]
    pub async fn reconcile(&self, batch: EventBatch) -> Result<ReconcileSummary> {
        let started = Instant::now();
        let mut summary = ReconcileSummary {
            events: batch.len(),
            ..ReconcileSummary::default()
        };

        for event in &batch.events {
            self.process_event(event, batch.env.as_deref(), &mut summary)
                .await?;
        }

        self.metrics.record_batch(summary.events);
        self.metrics.observe_reconcile_duration(started.elapsed());
        tracing::debug!(?summary, "batch reconciled");
        Ok(summary)
    }

    /// Read-through task lookup for the query surface: cache first, then the
    /// durable store.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable store fails or times out.
    pub async fn lookup(&self, id: &TaskId) -> Result<Option<Task>> {
        self.load_task(id).await
    }

    async fn process_event(
        &self,
        event: &Event,
        env: Option<&str>,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        // Cycle guard: a task cannot be its own parent. The event still
        // merges, but as a root.
        let mut event = event.clone();
        if event.parent_id.as_ref() == Some(&event.task_id) {
            tracing::warn!(
                task_id = %event.task_id,
                "rejecting self-parent linkage, treating task as root"
            );
            self.metrics.record_self_parent_rejection();
            summary.rejected_self_parent += 1;
            event.parent_id = None;
        }

        let task = {
            let _guard = self.id_locks.acquire(&event.task_id).await;

            let (mut task, created) = self.load_or_create(&event.task_id).await?;
            task.apply(&event, &self.trim);
            if task.env.is_none() {
                task.env = env.map(String::from);
            }
            if created {
                summary.created += 1;
            } else {
                summary.updated += 1;
            }

            if !task.is_resolved() {
                match task.parent_id.clone() {
                    None => task.resolve_as_root(),
                    Some(parent_id) => match self.load_task(&parent_id).await? {
                        Some(parent) if parent.is_resolved() => {
                            task.resolve_with_parent(&parent);
                        }
                        _ => task.mark_orphan(),
                    },
                }
            }

            self.persist(vec![task.clone()]).await?;
            task
        };

        if task.is_resolved() {
            self.cascade(task, summary).await?;
        } else if let Some(parent_id) = task.parent_id.clone() {
            self.buffer_orphan(&parent_id, task.id.clone(), summary)
                .await?;
        }

        Ok(())
    }

    /// Buffers a child waiting on `parent_id`, then re-checks the parent.
    ///
    /// The re-check closes the race where the parent resolves between our
    /// lookup and the push: if it did, its own cascade may already have
    /// pulled the orphan set, so run another cascade from the parent.
    async fn buffer_orphan(
        &self,
        parent_id: &TaskId,
        child_id: TaskId,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        self.cache
            .push_orphans(parent_id, vec![child_id.clone()])
            .await?;
        summary.orphans_buffered += 1;
        self.metrics.record_orphans_buffered(1);
        tracing::debug!(
            child = %child_id,
            parent = %parent_id,
            "buffered orphan awaiting its parent"
        );

        if let Some(parent) = self.load_task(parent_id).await? {
            if parent.is_resolved() {
                self.cascade(parent, summary).await?;
            }
        }
        Ok(())
    }

    /// Releases and resolves every descendant buffered under `root`'s id,
    /// cascading through arbitrarily deep chains. Processes one task at a
    /// time off a worklist, taking a single per-id lock per step.
    async fn cascade(&self, root: Task, summary: &mut ReconcileSummary) -> Result<()> {
        let mut worklist = vec![root];

        while let Some(parent) = worklist.pop() {
            let children = match self.cache.pull_orphans(&parent.id).await {
                Ok(Some(children)) => children,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(parent = %parent.id, error = %e, "orphan pull failed");
                    continue;
                }
            };

            summary.orphans_released += children.len();
            self.metrics.record_orphans_released(children.len());

            for child_id in children {
                let resolved = {
                    let _guard = self.id_locks.acquire(&child_id).await;
                    let Some(mut child) = self.load_task(&child_id).await? else {
                        tracing::warn!(
                            child = %child_id,
                            parent = %parent.id,
                            "buffered orphan has no task record, skipping"
                        );
                        continue;
                    };
                    child.resolve_with_parent(&parent);
                    self.persist(vec![child.clone()]).await?;
                    child
                };
                tracing::debug!(child = %resolved.id, parent = %parent.id, "orphan resolved");
                worklist.push(resolved);
            }
        }

        Ok(())
    }

    async fn load_or_create(&self, id: &TaskId) -> Result<(Task, bool)> {
        match self.load_task(id).await? {
            Some(task) => Ok((task, false)),
            None => Ok((Task::new(id.clone()), true)),
        }
    }

    async fn load_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let ids = [id.clone()];

        match self.bounded(self.cache.get_tasks(&ids)).await {
            Ok(mut cached) => {
                if let Some(task) = cached.remove(id) {
                    self.metrics.record_task_cache_lookup(1, 0);
                    return Ok(Some(task));
                }
                self.metrics.record_task_cache_lookup(0, 1);
            }
            // A failing cache is a slow day, not an outage: degrade to miss.
            Err(e) => tracing::warn!(task_id = %id, error = %e, "task cache lookup failed"),
        }

        let mut stored = self.bounded(self.store.get(&ids)).await?;
        Ok(stored.remove(id))
    }

    async fn persist(&self, tasks: Vec<Task>) -> Result<()> {
        self.bounded(self.store.upsert(tasks.clone())).await?;
        if let Err(e) = self.bounded(self.cache.put_tasks(tasks)).await {
            tracing::warn!(error = %e, "task cache write-through failed");
        }
        Ok(())
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::storage("store/cache call exceeded its timeout"))?
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local::LocalCacheHandler;
    use crate::store::memory::InMemoryTaskStore;
    use trellis_core::TaskStatus;

    fn engine() -> (Reconciler, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let cache = Arc::new(LocalCacheHandler::new(1 << 20, 1 << 20));
        let engine = Reconciler::new(Arc::clone(&store) as Arc<dyn crate::store::TaskStore>, cache);
        (engine, store)
    }

    async fn stored(store: &InMemoryTaskStore, id: &str) -> Task {
        let id = TaskId::new(id);
        store.get(&[id.clone()]).await.expect("store get")[&id].clone()
    }

    #[tokio::test]
    async fn start_and_success_merge_into_one_terminal_root() -> Result<()> {
        let (engine, store) = engine();

        let batch = EventBatch::new(vec![
            Event::start("job_1", "job").with_string("region", "eu"),
            Event::success("job_1"),
        ]);
        let summary = engine.reconcile(batch).await?;

        assert_eq!(summary.events, 2);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);

        let task = stored(&store, "job_1").await;
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.primary_id, Some(TaskId::new("job_1")));
        assert!(task.parents_path.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn self_parent_is_rejected_and_treated_as_root() -> Result<()> {
        let (engine, store) = engine();

        let batch = EventBatch::new(vec![
            Event::start("loop_1", "loop").with_parent("loop_1"),
        ]);
        let summary = engine.reconcile(batch).await?;

        assert_eq!(summary.rejected_self_parent, 1);
        let task = stored(&store, "loop_1").await;
        assert!(task.parent_id.is_none());
        assert_eq!(task.primary_id, Some(TaskId::new("loop_1")));

        Ok(())
    }

    #[tokio::test]
    async fn lookup_reads_through_to_the_store() -> Result<()> {
        let (engine, _store) = engine();
        engine
            .reconcile(EventBatch::new(vec![Event::start("job_1", "job")]))
            .await?;

        assert!(engine.lookup(&TaskId::new("job_1")).await?.is_some());
        assert!(engine.lookup(&TaskId::new("missing")).await?.is_none());

        Ok(())
    }
}
