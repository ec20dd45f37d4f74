//! Pluggable durable storage for task records.
//!
//! The [`TaskStore`] trait is the persistence seam of the reconciliation
//! engine. The engine is the sole writer; readers observe task state by
//! polling the store. The in-memory implementation backs tests and
//! single-process deployments; production stores implement the same
//! contract against a real database.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use trellis_core::{Result, Task, TaskId};

/// Storage abstraction for merged task records.
///
/// ## Semantics
///
/// - `get` returns only the ids that exist; a missing id is not an error.
/// - `upsert` is a full replacement of each task record. Concurrency control
///   is the caller's concern: the reconciliation engine serializes mutations
///   per task id before writing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetches the given ids. Missing ids are simply absent from the result.
    async fn get(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>>;

    /// Inserts or replaces the given task records as one batched write.
    async fn upsert(&self, tasks: Vec<Task>) -> Result<()>;
}
