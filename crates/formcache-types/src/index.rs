//! Per-user draft index.

use serde::{Deserialize, Serialize};

use crate::draft::Millis;

/// Registry of a user's draft keys plus session and activity state.
///
/// `draft_keys` is an ordered list with set semantics; only the mutators
/// below should change it so duplicates never appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraftIndex {
    pub user_id: String,
    /// Last session that touched this user's drafts; empty when none is active.
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub draft_keys: Vec<String>,
    pub last_activity: Millis,
}

impl UserDraftIndex {
    /// Create an empty index.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, now: Millis) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            draft_keys: Vec::new(),
            last_activity: now,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.draft_keys.iter().any(|k| k == key)
    }

    /// Append `key` unless already listed. Returns whether it was added.
    pub fn insert_key(&mut self, key: &str) -> bool {
        if self.contains(key) {
            return false;
        }
        self.draft_keys.push(key.to_string());
        true
    }

    /// Drop every occurrence of `key`. Returns whether anything was removed.
    pub fn remove_key(&mut self, key: &str) -> bool {
        let before = self.draft_keys.len();
        self.draft_keys.retain(|k| k != key);
        self.draft_keys.len() != before
    }

    /// Bump the activity timestamp.
    pub fn touch(&mut self, now: Millis) {
        self.last_activity = now;
    }

    /// Whether the index has been idle for longer than `threshold_ms`.
    ///
    /// Saturates, so an out-of-range `last_activity` read back from storage
    /// counts as stale instead of overflowing.
    pub fn is_stale(&self, now: Millis, threshold_ms: Millis) -> bool {
        now.saturating_sub(self.last_activity) > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = UserDraftIndex::new("u1", "s1", 0);
        assert!(index.insert_key("a"));
        assert!(!index.insert_key("a"));
        assert!(index.insert_key("b"));
        assert_eq!(index.draft_keys, vec!["a", "b"]);
    }

    #[test]
    fn test_remove_key() {
        let mut index = UserDraftIndex::new("u1", "s1", 0);
        index.insert_key("a");
        index.insert_key("b");
        assert!(index.remove_key("a"));
        assert!(!index.remove_key("a"));
        assert_eq!(index.draft_keys, vec!["b"]);
    }

    #[test]
    fn test_stale_boundary() {
        let index = UserDraftIndex::new("u1", "", 1_000);
        assert!(!index.is_stale(1_000 + 1_800_000, 1_800_000));
        assert!(index.is_stale(1_000 + 1_800_001, 1_800_000));
    }

    #[test]
    fn test_stale_with_extreme_activity() {
        let ancient = UserDraftIndex::new("u1", "", Millis::MIN);
        assert!(ancient.is_stale(1_000, 1_800_000));

        // Activity in the far future is never stale.
        let future = UserDraftIndex::new("u1", "", Millis::MAX);
        assert!(!future.is_stale(Millis::MIN, 1_800_000));
    }

    #[test]
    fn test_decodes_without_optional_fields() {
        let index: UserDraftIndex =
            serde_json::from_str(r#"{"userId":"u9","lastActivity":12}"#).unwrap();
        assert_eq!(index.session_id, "");
        assert!(index.draft_keys.is_empty());
    }
}
