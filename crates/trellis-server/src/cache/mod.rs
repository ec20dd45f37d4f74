//! Cache handlers for the reconciliation engine.
//!
//! One handler owns both bounded caches the engine leans on:
//!
//! - The **task cache** is a read-through/write-through accelerator in front
//!   of the durable store. A miss is not an error; the caller falls back to
//!   the store, so eviction only affects latency, never correctness.
//! - The **orphan cache** buffers child task ids whose declared parent has
//!   not yet been observed, keyed by the parent id. Eviction here means
//!   those children stay permanently unresolved if their parent never
//!   arrives: a deliberate bounded-memory trade-off.
//!
//! Backends are pluggable behind [`CacheHandler`]: an in-process
//! weight-bounded map ([`local::LocalCacheHandler`]) or an external
//! key-value store ([`redis::RedisCacheHandler`]), selected by
//! configuration.

pub mod local;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use trellis_core::{Result, Task, TaskId};

/// Weight of one orphan cache entry: `2 × (key length + Σ value lengths)`.
#[must_use]
pub fn orphan_entry_weight(parent: &TaskId, children: &[TaskId]) -> usize {
    let values: usize = children.iter().map(TaskId::len).sum();
    2 * (parent.len() + values)
}

/// Combined task/orphan cache contract.
#[async_trait]
pub trait CacheHandler: Send + Sync {
    /// Looks up tasks by id. Missing ids are simply absent from the result.
    async fn get_tasks(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>>;

    /// Inserts or refreshes task records.
    async fn put_tasks(&self, tasks: Vec<Task>) -> Result<()>;

    /// Atomically retrieves and removes the children waiting on `parent`.
    ///
    /// At most one caller observes a given batch of orphans; a concurrent
    /// `push_orphans` on the same key is never lost.
    async fn pull_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>>;

    /// Non-destructive read of the children waiting on `parent`.
    async fn peek_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>>;

    /// Appends `children` to the pending set for `parent`.
    async fn push_orphans(&self, parent: &TaskId, children: Vec<TaskId>) -> Result<()>;
}
