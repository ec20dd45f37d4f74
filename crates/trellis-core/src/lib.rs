//! # trellis-core
//!
//! Shared vocabulary for the Trellis task-tracing pipeline.
//!
//! Trellis traces hierarchically nested units of work: client processes emit
//! lifecycle [`Event`]s for tasks, and the server merges those events into
//! persisted [`Task`] records forming parent/child trees, tolerating events
//! that arrive out of order or from different threads.
//!
//! This crate holds the pure data model and its invariants:
//!
//! - **Ids**: [`TaskId`], stable `{name}_{ULID}` identifiers
//! - **Events**: tagged lifecycle observations with three-map context
//! - **Tasks**: merged records with exhaustively-dispatched merge rules
//! - **Trimming**: value-length policy applied at merge time
//!
//! plus the ambient concerns every Trellis binary shares: the error enum and
//! the logging bootstrap.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod id;
pub mod observability;
pub mod task;
pub mod trim;

pub use error::{Error, Result};
pub use event::{Event, EventBatch, EventContext, EventKind};
pub use id::TaskId;
pub use task::{Task, TaskStatus};
pub use trim::TrimPolicy;
