//! Redis-backed cache handler.
//!
//! An external key-value backend for deployments where several
//! reconciliation processes must share one task/orphan cache. Tasks are
//! stored as JSON strings under `trellis:task:{id}`; pending orphan sets are
//! Redis lists under `trellis:orphan:{parent}`.
//!
//! Capacity bounding is delegated to the Redis deployment (`maxmemory` with
//! an LRU policy) plus per-entry TTLs; the in-process weight accounting of
//! [`super::local::LocalCacheHandler`] does not apply here.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use trellis_core::{Error, Result, Task, TaskId};

use super::CacheHandler;

/// Default TTL for cached tasks and orphan sets.
pub const DEFAULT_TTL_SECONDS: u64 = 24 * 60 * 60;

const TASK_KEY_PREFIX: &str = "trellis:task:";
const ORPHAN_KEY_PREFIX: &str = "trellis:orphan:";

fn task_key(id: &TaskId) -> String {
    format!("{TASK_KEY_PREFIX}{id}")
}

fn orphan_key(parent: &TaskId) -> String {
    format!("{ORPHAN_KEY_PREFIX}{parent}")
}

fn redis_err(context: &str, e: &redis::RedisError) -> Error {
    Error::Cache {
        message: format!("{context}: {e}"),
    }
}

/// External [`CacheHandler`] over a shared Redis deployment.
#[derive(Clone)]
pub struct RedisCacheHandler {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisCacheHandler {
    /// Connects to the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns a cache error when the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| redis_err("invalid redis url", &e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| redis_err("redis connection failed", &e))?;
        Ok(Self { conn, ttl_seconds })
    }

    fn encode_task(task: &Task) -> Result<String> {
        serde_json::to_string(task).map_err(|e| Error::Serialization {
            message: format!("failed to encode task {}: {e}", task.id),
        })
    }

    fn decode_task(raw: &str) -> Result<Task> {
        serde_json::from_str(raw).map_err(|e| Error::Serialization {
            message: format!("failed to decode cached task: {e}"),
        })
    }
}

impl std::fmt::Debug for RedisCacheHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheHandler")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

#[async_trait]
impl CacheHandler for RedisCacheHandler {
    async fn get_tasks(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = ids.iter().map(task_key).collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn
            .mget(keys)
            .await
            .map_err(|e| redis_err("MGET tasks failed", &e))?;

        let mut found = HashMap::new();
        for (id, value) in ids.iter().zip(raw) {
            if let Some(raw_task) = value {
                found.insert(id.clone(), Self::decode_task(&raw_task)?);
            }
        }
        Ok(found)
    }

    async fn put_tasks(&self, tasks: Vec<Task>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for task in &tasks {
            pipe.set_ex(task_key(&task.id), Self::encode_task(task)?, self.ttl_seconds)
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("SET tasks failed", &e))
    }

    async fn pull_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>> {
        let key = orphan_key(parent);
        let mut conn = self.conn.clone();

        // LRANGE + DEL in one MULTI/EXEC so a concurrent RPUSH on the same
        // parent is either observed here or left intact for the next pull.
        let (children, _removed): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("pull orphans failed", &e))?;

        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(children.into_iter().map(TaskId::new).collect()))
    }

    async fn peek_orphans(&self, parent: &TaskId) -> Result<Option<Vec<TaskId>>> {
        let mut conn = self.conn.clone();
        let children: Vec<String> = conn
            .lrange(orphan_key(parent), 0, -1)
            .await
            .map_err(|e| redis_err("peek orphans failed", &e))?;

        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(children.into_iter().map(TaskId::new).collect()))
    }

    async fn push_orphans(&self, parent: &TaskId, children: Vec<TaskId>) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }

        let key = orphan_key(parent);
        let values: Vec<String> = children.iter().map(ToString::to_string).collect();
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .rpush(&key, values)
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("push orphans failed", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_kind() {
        let id = TaskId::new("job_01H");
        assert_eq!(task_key(&id), "trellis:task:job_01H");
        assert_eq!(orphan_key(&id), "trellis:orphan:job_01H");
    }

    #[test]
    fn tasks_encode_and_decode() {
        let task = Task::new(TaskId::new("job_1"));
        let raw = RedisCacheHandler::encode_task(&task).expect("encode");
        let parsed = RedisCacheHandler::decode_task(&raw).expect("decode");
        assert_eq!(task, parsed);
    }
}
