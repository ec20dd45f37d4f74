//! The merged, addressable record for one traced task.
//!
//! A [`Task`] is built up by merging the events that reference its id, in
//! whatever order they arrive. The merge is field-wise: context maps are
//! unioned (last write wins per key), the name and start time are recorded by
//! the first Start/Spot observation, and the status becomes terminal exactly
//! once. Events that arrive after termination still merge context but never
//! regress the status.
//!
//! Parent linkage (`primary_id`, `parents_path`) is assigned by the
//! reconciliation engine, which is the sole writer of task records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};
use crate::id::TaskId;
use crate::trim::TrimPolicy;

/// Task completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The task has started (or been referenced) but not yet terminated.
    Unterminated,
    /// The task terminated successfully.
    Success,
    /// The task terminated with an error.
    Error,
}

impl TaskStatus {
    /// Returns true for Success and Error.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unterminated => "UNTERMINATED",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// The merged record for one task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// The task's stable identity.
    pub id: TaskId,
    /// Display name, recorded by the first Start/Spot observation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Completion status.
    pub status: TaskStatus,
    /// Immediate parent, when one has been declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// The root ancestor's id; equals `id` for roots. Absent while the task
    /// is still an unresolved orphan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<TaskId>,
    /// Ancestor names, root-first. Empty for roots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents_path: Vec<String>,
    /// Merged short string attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub strings: BTreeMap<String, String>,
    /// Merged numeric attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Merged long-text attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub texts: BTreeMap<String, String>,
    /// Environment tag of the batch that first touched this task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// True while the declared parent has not yet been observed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub orphan: bool,
    /// When the task started, per its Start/Spot event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the task terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds; present only once terminal with
    /// both timestamps known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl Task {
    /// Creates a fresh, unterminated task record for the given id.
    #[must_use]
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            name: None,
            status: TaskStatus::Unterminated,
            parent_id: None,
            primary_id: None,
            parents_path: Vec::new(),
            strings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            texts: BTreeMap::new(),
            env: None,
            orphan: false,
            start_time: None,
            end_time: None,
            duration_ms: None,
        }
    }

    /// Returns true once parent linkage has been established: the task is a
    /// known root, or its ancestry has been computed from a resolved parent.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.primary_id.is_some() && !self.orphan
    }

    /// Merges one event into this record.
    ///
    /// Dispatches on the event kind: Start records name and start time, Info
    /// merges context only, Success/Error terminate, Spot starts and
    /// terminates at the same instant. Context always merges, last write
    /// wins per key, values trimmed per `trim`. The status never regresses:
    /// a second terminal observation merges context and is otherwise
    /// ignored.
    pub fn apply(&mut self, event: &Event, trim: &TrimPolicy) {
        debug_assert_eq!(self.id, event.task_id);

        self.merge_context(event, trim);

        match &event.kind {
            EventKind::Start { name } => {
                self.record_start(name, event.time);
            }
            EventKind::Info => {}
            EventKind::Success => self.terminate(TaskStatus::Success, event.time),
            EventKind::Error => self.terminate(TaskStatus::Error, event.time),
            EventKind::Spot { name } => {
                self.record_start(name, event.time);
                self.terminate(TaskStatus::Success, event.time);
            }
        }

        if self.parent_id.is_none() {
            self.parent_id.clone_from(&event.parent_id);
        }
    }

    fn merge_context(&mut self, event: &Event, trim: &TrimPolicy) {
        for (key, value) in &event.context.strings {
            self.strings.insert(key.clone(), trim.trim(key, value));
        }
        for (key, value) in &event.context.metrics {
            self.metrics.insert(key.clone(), *value);
        }
        for (key, value) in &event.context.texts {
            self.texts.insert(key.clone(), trim.trim(key, value));
        }
    }

    fn record_start(&mut self, name: &str, time: DateTime<Utc>) {
        if self.name.is_none() {
            self.name = Some(name.to_string());
        }
        if self.start_time.is_none() {
            self.start_time = Some(time);
        }
    }

    fn terminate(&mut self, status: TaskStatus, time: DateTime<Utc>) {
        if self.status.is_terminal() {
            tracing::debug!(task_id = %self.id, status = %self.status, "ignoring repeated terminal event");
            return;
        }
        self.status = status;
        self.end_time = Some(time);
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            self.duration_ms = Some((end - start).num_milliseconds());
        }
    }

    /// Marks this task as a root: its own primary, empty ancestry.
    pub fn resolve_as_root(&mut self) {
        self.primary_id = Some(self.id.clone());
        self.parents_path = Vec::new();
        self.orphan = false;
    }

    /// Computes ancestry from a resolved parent.
    ///
    /// `primary_id` is inherited from the parent and `parents_path` extends
    /// the parent's path with the parent's own name. Status is untouched:
    /// linkage propagates downward, outcomes do not.
    pub fn resolve_with_parent(&mut self, parent: &Task) {
        self.parent_id = Some(parent.id.clone());
        self.primary_id = parent
            .primary_id
            .clone()
            .or_else(|| Some(parent.id.clone()));
        self.parents_path = parent.parents_path.clone();
        if let Some(name) = &parent.name {
            self.parents_path.push(name.clone());
        }
        self.orphan = false;
    }

    /// Marks the task as waiting for its parent to be observed.
    pub fn mark_orphan(&mut self) {
        self.orphan = true;
        self.primary_id = None;
    }

    /// Approximate byte cost of this record, used for cache weight
    /// accounting.
    #[must_use]
    pub fn weight(&self) -> usize {
        const RECORD_OVERHEAD: usize = 64;
        let maps: usize = self
            .strings
            .iter()
            .chain(self.texts.iter())
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
            + self
                .metrics
                .keys()
                .map(|k| k.len() + std::mem::size_of::<f64>())
                .sum::<usize>();
        self.id.len()
            + self.name.as_deref().map_or(0, str::len)
            + self.parent_id.as_ref().map_or(0, TaskId::len)
            + self.primary_id.as_ref().map_or(0, TaskId::len)
            + self.parents_path.iter().map(String::len).sum::<usize>()
            + maps
            + RECORD_OVERHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> TrimPolicy {
        TrimPolicy::default()
    }

    #[test]
    fn start_then_success_produces_terminal_task_with_duration() {
        let start = Event::start("job_1", "job");
        let end = Event::success("job_1").with_time(start.time + Duration::milliseconds(250));

        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(&start, &policy());
        assert_eq!(task.status, TaskStatus::Unterminated);
        assert_eq!(task.name.as_deref(), Some("job"));
        assert!(task.duration_ms.is_none());

        task.apply(&end, &policy());
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.duration_ms, Some(250));
    }

    #[test]
    fn out_of_order_success_before_start_still_derives_duration() {
        let start = Event::start("job_1", "job");
        let end = Event::success("job_1").with_time(start.time + Duration::milliseconds(100));

        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(&end, &policy());
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.duration_ms.is_none());

        // Start arrives late; status stays terminal but timing back-fills.
        task.apply(&start, &policy());
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.start_time, Some(start.time));
    }

    #[test]
    fn status_never_regresses_after_termination() {
        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(&Event::error("job_1"), &policy());
        task.apply(
            &Event::success("job_1").with_string("late", "yes"),
            &policy(),
        );

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.strings.get("late").map(String::as_str), Some("yes"));
    }

    #[test]
    fn context_merge_is_idempotent_and_last_write_wins() {
        let info = Event::info("job_1")
            .with_string("key", "v1")
            .with_metric("count", 1.0);

        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(&info, &policy());
        let once = task.clone();
        task.apply(&info, &policy());
        assert_eq!(task, once);

        task.apply(&Event::info("job_1").with_string("key", "v2"), &policy());
        assert_eq!(task.strings.get("key").map(String::as_str), Some("v2"));
    }

    #[test]
    fn spot_is_started_and_succeeded_at_the_same_instant() {
        let spot = Event::spot("leaf_1", "leaf");
        let mut task = Task::new(TaskId::new("leaf_1"));
        task.apply(&spot, &policy());

        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.name.as_deref(), Some("leaf"));
        assert_eq!(task.start_time, task.end_time);
        assert_eq!(task.duration_ms, Some(0));
    }

    #[test]
    fn oversized_values_are_trimmed_on_merge() {
        let trim = TrimPolicy::new(1000).with_key_limit("sql2", 100);
        let huge = "a".repeat(100_000);
        let event = Event::info("job_1")
            .with_string("sql1", huge.clone())
            .with_string("sql2", huge.clone())
            .with_text("sql1", huge);

        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(&event, &trim);

        assert_eq!(task.strings.get("sql1").map(String::len), Some(1000));
        assert_eq!(task.strings.get("sql2").map(String::len), Some(100));
        assert_eq!(task.texts.get("sql1").map(String::len), Some(1000));
    }

    #[test]
    fn resolve_with_parent_extends_path_and_inherits_primary() {
        let mut parent = Task::new(TaskId::new("p_1"));
        parent.apply(&Event::start("p_1", "parent"), &policy());
        parent.resolve_as_root();

        let mut child = Task::new(TaskId::new("c_1"));
        child.apply(
            &Event::start("c_1", "child").with_parent("p_1"),
            &policy(),
        );
        child.resolve_with_parent(&parent);

        assert_eq!(child.primary_id, Some(TaskId::new("p_1")));
        assert_eq!(child.parents_path, vec!["parent".to_string()]);
        assert!(child.is_resolved());
    }

    #[test]
    fn orphan_marking_clears_resolution() {
        let mut task = Task::new(TaskId::new("c_1"));
        task.mark_orphan();
        assert!(!task.is_resolved());
        assert!(task.orphan);
    }

    #[test]
    fn task_roundtrips_through_json() {
        let mut task = Task::new(TaskId::new("job_1"));
        task.apply(
            &Event::start("job_1", "job").with_string("region", "eu"),
            &policy(),
        );
        task.resolve_as_root();

        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, parsed);
    }
}
