//! Lifecycle events emitted by instrumented tasks.
//!
//! An [`Event`] is one observation about a task: its start, a contextual
//! annotation, or its termination. Events are buffered client-side, shipped
//! in batches, and merged server-side into [`Task`](crate::task::Task)
//! records, so a single task is usually described by several events that may
//! arrive out of order and from different threads.
//!
//! Event kinds are a tagged variant rather than an open hierarchy: the merge
//! rules dispatch exhaustively on the tag, and adding a kind is a
//! compile-time-checked change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TaskId;

/// The kind of observation an event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The task began executing. Carries the task's display name.
    Start {
        /// Human-readable task name, recorded once on the merged task.
        name: String,
    },
    /// A context-only annotation; merges attribute maps and nothing else.
    Info,
    /// The task terminated successfully.
    Success,
    /// The task terminated with an error.
    Error,
    /// A one-shot event that is simultaneously a start and a terminal
    /// success, used for fire-and-forget leaf tasks.
    Spot {
        /// Human-readable task name.
        name: String,
    },
}

impl EventKind {
    /// Returns the name carried by Start/Spot kinds.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Start { name } | Self::Spot { name } => Some(name),
            Self::Info | Self::Success | Self::Error => None,
        }
    }

    /// Returns true when this kind terminates the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Spot { .. })
    }
}

/// Contextual attributes attached to an event.
///
/// Three independent string-keyed maps: short string attributes, numeric
/// metrics, and long-text attributes. Keys are unique within each map; the
/// merge into a task is last-write-wins per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    /// Short string attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub strings: BTreeMap<String, String>,
    /// Numeric attributes ("metrics").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Long-text attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub texts: BTreeMap<String, String>,
}

impl EventContext {
    /// Returns true when all three maps are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.metrics.is_empty() && self.texts.is_empty()
    }

    /// Approximate byte cost of the carried attributes.
    #[must_use]
    pub fn weight(&self) -> usize {
        let strings: usize = self.strings.iter().map(|(k, v)| k.len() + v.len()).sum();
        let texts: usize = self.texts.iter().map(|(k, v)| k.len() + v.len()).sum();
        let metrics: usize = self
            .metrics
            .keys()
            .map(|k| k.len() + std::mem::size_of::<f64>())
            .sum();
        strings + texts + metrics
    }
}

/// One observation about a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The task this event concerns. Immutable once assigned: an event never
    /// changes the identity of the task it targets.
    pub task_id: TaskId,
    /// The declared parent task, if any. Absent means root or unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// What this event observed.
    #[serde(flatten)]
    pub kind: EventKind,
    /// Attributes to merge into the task.
    #[serde(default, skip_serializing_if = "EventContext::is_empty")]
    pub context: EventContext,
    /// When the observation was made.
    pub time: DateTime<Utc>,
}

impl Event {
    fn new(task_id: impl Into<TaskId>, kind: EventKind) -> Self {
        Self {
            task_id: task_id.into(),
            parent_id: None,
            kind,
            context: EventContext::default(),
            time: Utc::now(),
        }
    }

    /// Creates a Start event carrying the task's name.
    #[must_use]
    pub fn start(task_id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        Self::new(task_id, EventKind::Start { name: name.into() })
    }

    /// Creates a context-only Info event.
    #[must_use]
    pub fn info(task_id: impl Into<TaskId>) -> Self {
        Self::new(task_id, EventKind::Info)
    }

    /// Creates a terminal Success event.
    #[must_use]
    pub fn success(task_id: impl Into<TaskId>) -> Self {
        Self::new(task_id, EventKind::Success)
    }

    /// Creates a terminal Error event.
    #[must_use]
    pub fn error(task_id: impl Into<TaskId>) -> Self {
        Self::new(task_id, EventKind::Error)
    }

    /// Creates a Spot event: an immediately-terminal leaf task.
    #[must_use]
    pub fn spot(task_id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        Self::new(task_id, EventKind::Spot { name: name.into() })
    }

    /// Sets the declared parent task.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<TaskId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Adds a string attribute.
    #[must_use]
    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.strings.insert(key.into(), value.into());
        self
    }

    /// Adds a numeric attribute.
    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.context.metrics.insert(key.into(), value);
        self
    }

    /// Adds a long-text attribute.
    #[must_use]
    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.texts.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole context.
    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }

    /// Overrides the observation timestamp.
    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Returns the task name carried by this event, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.kind.name()
    }

    /// Returns true when this event terminates the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Approximate byte cost of the event, used for queue weight accounting.
    ///
    /// Counts the identifying strings and the context payload plus a small
    /// fixed overhead for the envelope fields.
    #[must_use]
    pub fn weight(&self) -> usize {
        const ENVELOPE_OVERHEAD: usize = 48;
        self.task_id.len()
            + self.parent_id.as_ref().map_or(0, TaskId::len)
            + self.name().map_or(0, str::len)
            + self.context.weight()
            + ENVELOPE_OVERHEAD
    }
}

/// The wire envelope for one client-to-server request.
///
/// A batch is an ordered sequence of events plus an optional environment tag
/// identifying the emitting deployment. The server acknowledges per batch,
/// not per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    /// Environment/deployment tag, merged onto every task the batch touches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Events in arrival order.
    pub events: Vec<Event>,
}

impl EventBatch {
    /// Creates a batch with no environment tag.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { env: None, events }
    }

    /// Sets the environment tag.
    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when the batch carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
