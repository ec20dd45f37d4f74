//! # trellis-server
//!
//! Server side of the Trellis task-tracing pipeline.
//!
//! Clients ship batches of lifecycle events; this crate merges them into
//! persisted task records forming parent/child trees:
//!
//! - **Reconciliation engine**: per-event merge with per-id mutation
//!   serialization, parent linkage, and transitive orphan resolution
//! - **Task cache**: bounded read/write-through accelerator in front of the
//!   durable store
//! - **Orphan cache**: weight-bounded buffer for children observed before
//!   their parent, with LRU-by-access eviction
//! - **Ingest surface**: axum routes acknowledging per batch
//!
//! Events tolerate any arrival order: a child that shows up first waits in
//! the orphan cache and is released, transitively, when its parent
//! resolves.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod metrics;
pub mod reconcile;
pub mod routes;
pub mod server;
pub mod store;

pub use cache::local::LocalCacheHandler;
pub use cache::redis::RedisCacheHandler;
pub use cache::CacheHandler;
pub use config::{CacheBackend, ServerConfig};
pub use reconcile::{ReconcileSummary, Reconciler};
pub use server::Server;
pub use store::memory::InMemoryTaskStore;
pub use store::TaskStore;
