//! Task identifiers.
//!
//! A [`TaskId`] is the stable identity of one traced unit of work. Ids are
//! minted on the client as `{name}_{ULID}`:
//!
//! - The name prefix keeps ids human-scannable in logs and store dumps.
//! - The ULID suffix makes ids globally unique without coordination and
//!   lexicographically sortable by creation time.
//!
//! Events reference tasks only through ids; an id never changes once a task
//! has been observed under it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// The stable identifier of a traced task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an existing id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh id for a task with the given name.
    ///
    /// Whitespace in the name is replaced so the id stays a single token.
    #[must_use]
    pub fn generate(name: &str) -> Self {
        let prefix: String = name
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();
        Self(format!("{prefix}_{}", Ulid::new()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the length of the id in bytes, used for cache weight
    /// accounting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty id (never valid, but `len` pairs with it).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "task id must not be empty".into(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_the_name_prefix() {
        let id = TaskId::generate("fetch orders");
        assert!(id.as_str().starts_with("fetch-orders_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = TaskId::generate("job");
        let b = TaskId::generate("job");
        assert_ne!(a, b);
    }

    #[test]
    fn id_roundtrips_through_serde() {
        let id = TaskId::generate("job");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn empty_id_is_rejected() {
        let parsed: Result<TaskId> = "   ".parse();
        assert!(parsed.is_err());
    }
}
