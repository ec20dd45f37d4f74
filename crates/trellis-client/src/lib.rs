//! # trellis-client
//!
//! Client-side event pipeline for the Trellis task-tracing system.
//!
//! Application threads report task lifecycle [`Event`](trellis_core::Event)s
//! through a [`Reporter`]; events are buffered in a bounded, non-blocking
//! queue and drained by a pool of sender workers that batch, encode, and
//! deliver them to the Trellis server with retry and exponential backoff.
//!
//! ## Guarantees
//!
//! - **Never stalls user code**: `send` is fire-and-forget; a full buffer
//!   drops the newest event and warns instead of blocking.
//! - **At-most-once delivery**: a batch that exhausts its retries is dropped
//!   and logged with its full payload; it is never redelivered.
//! - **Cooperative shutdown**: `close` stops new batches, grants in-flight
//!   sends a bounded grace period, then forces termination.
//!
//! ## Example
//!
//! ```rust,no_run
//! use trellis_client::{Reporter, ReporterConfig, TaskScope};
//! use trellis_core::{Event, TaskId};
//!
//! # async fn run() -> trellis_core::Result<()> {
//! let reporter = Reporter::new(
//!     ReporterConfig::new("http://trellis.internal:9000").with_env("production"),
//! )?;
//!
//! let task_id = TaskId::generate("nightly-import");
//! reporter.send(Event::start(task_id.clone(), "nightly-import"));
//! {
//!     let _scope = TaskScope::enter(task_id.clone());
//!     // Work executed here can mint child events with
//!     // `TaskScope::current()` as their parent.
//! }
//! reporter.send(Event::success(task_id));
//! reporter.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod reporter;
pub mod scope;
pub mod sender;

pub use config::ReporterConfig;
pub use pool::{SenderPool, ShutdownFlag};
pub use queue::BoundedEventQueue;
pub use reporter::Reporter;
pub use scope::{ScopeGuard, TaskScope};
pub use sender::{EventSender, HttpEventSender, RecordingSender};
