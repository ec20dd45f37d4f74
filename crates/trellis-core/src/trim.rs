//! Attribute value trimming.
//!
//! Oversized attribute values are capped at merge time so a single runaway
//! annotation (a dumped SQL statement, a stack trace) cannot bloat the task
//! record or the caches downstream. The policy carries a default cap plus
//! per-key overrides for keys that are known to need more or less room.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default cap applied to attribute values without a per-key override.
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Value-length policy applied when merging event context into tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimPolicy {
    /// Cap for keys without an override, in characters.
    pub default_max_chars: usize,
    /// Per-key overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_key: BTreeMap<String, usize>,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            default_max_chars: DEFAULT_MAX_CHARS,
            per_key: BTreeMap::new(),
        }
    }
}

impl TrimPolicy {
    /// Creates a policy with the given default cap and no overrides.
    #[must_use]
    pub fn new(default_max_chars: usize) -> Self {
        Self {
            default_max_chars,
            per_key: BTreeMap::new(),
        }
    }

    /// Adds a per-key override.
    #[must_use]
    pub fn with_key_limit(mut self, key: impl Into<String>, max_chars: usize) -> Self {
        self.per_key.insert(key.into(), max_chars);
        self
    }

    /// Returns the cap for the given key.
    #[must_use]
    pub fn cap(&self, key: &str) -> usize {
        self.per_key
            .get(key)
            .copied()
            .unwrap_or(self.default_max_chars)
    }

    /// Trims a value to the key's cap, respecting char boundaries.
    #[must_use]
    pub fn trim(&self, key: &str, value: &str) -> String {
        let cap = self.cap(key);
        match value.char_indices().nth(cap) {
            Some((byte_idx, _)) => value[..byte_idx].to_string(),
            None => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cap_applies_without_override() {
        let policy = TrimPolicy::default();
        let huge = "a".repeat(5000);
        assert_eq!(policy.trim("sql", &huge).len(), DEFAULT_MAX_CHARS);
    }

    #[test]
    fn per_key_override_wins() {
        let policy = TrimPolicy::new(1000)
            .with_key_limit("sql1", 10_000)
            .with_key_limit("sql2", 100);
        let huge = "a".repeat(50_000);

        assert_eq!(policy.trim("sql1", &huge).len(), 10_000);
        assert_eq!(policy.trim("sql2", &huge).len(), 100);
        assert_eq!(policy.trim("sql3", &huge).len(), 1000);
    }

    #[test]
    fn short_values_pass_untouched() {
        let policy = TrimPolicy::default();
        assert_eq!(policy.trim("key", "short"), "short");
    }

    #[test]
    fn trimming_respects_char_boundaries() {
        let policy = TrimPolicy::new(2);
        assert_eq!(policy.trim("key", "äöü"), "äö");
    }
}
