//! In-memory task store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use trellis_core::{Error, Result, Task, TaskId};

use super::TaskStore;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("task store lock poisoned")
}

/// In-memory [`TaskStore`] for tests and single-process deployments.
///
/// Not durable: records live only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.tasks.read().map_err(poison_err)?.len())
    }

    /// Returns true when no tasks are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        Ok(ids
            .iter()
            .filter_map(|id| tasks.get(id).map(|task| (id.clone(), task.clone())))
            .collect())
    }

    async fn upsert(&self, new_tasks: Vec<Task>) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        for task in new_tasks {
            tasks.insert(task.id.clone(), task);
        }
        Ok(())
    }
}
