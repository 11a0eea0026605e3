//! Session state cookie: incremental agent-side state snapshot.
//!
//! After every exchange the agent may ship a partial diff of its internal
//! session state. The session folds those diffs into the cookie and resends
//! the whole cookie whenever the agent transport is rebuilt, so a freshly
//! created agent-side session can reconstruct its state without replaying
//! command history.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

// ============================================================================
// SessionStateCookie
// ============================================================================

/// Mapping of named state blobs, each independently replaceable or
/// removable.
///
/// Held in memory only for the lifetime of the session; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStateCookie {
    entries: FxHashMap<String, Vec<u8>>,
}

impl SessionStateCookie {
    /// Creates an empty cookie.
    ///
    /// An empty-but-present cookie is meaningful: its existence is what
    /// distinguishes a reattach from a first-ever attach.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an incremental update batch.
    ///
    /// Present values upsert their key; absent values (tombstones) delete
    /// it. Entries are applied in order.
    pub fn apply(&mut self, updates: SessionStateUpdates) {
        for (key, blob) in updates.entries {
            match blob {
                Some(blob) => {
                    self.entries.insert(key, blob);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Looks up a state blob by key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Returns the number of stored entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cookie holds no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// SessionStateUpdates
// ============================================================================

/// An ordered batch of cookie changes produced by the agent.
///
/// `Some(blob)` upserts the key, `None` is an explicit tombstone deleting
/// it.
#[derive(Debug, Clone, Default)]
pub struct SessionStateUpdates {
    /// Ordered `(key, value-or-tombstone)` pairs.
    pub entries: Vec<(String, Option<Vec<u8>>)>,
}

impl SessionStateUpdates {
    /// Creates an empty update batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an upsert entry.
    #[must_use]
    pub fn upsert(mut self, key: impl Into<String>, blob: impl Into<Vec<u8>>) -> Self {
        self.entries.push((key.into(), Some(blob.into())));
        self
    }

    /// Adds a tombstone entry deleting `key`.
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), None));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_upsert_and_tombstone() {
        let mut cookie = SessionStateCookie::new();
        cookie.apply(
            SessionStateUpdates::new()
                .upsert("Runtime", b"enabled".to_vec())
                .upsert("Network", b"v1".to_vec()),
        );
        assert_eq!(cookie.get("Runtime"), Some(b"enabled".as_slice()));
        assert_eq!(cookie.len(), 2);

        cookie.apply(
            SessionStateUpdates::new()
                .remove("Runtime")
                .upsert("Network", b"v2".to_vec()),
        );
        assert_eq!(cookie.get("Runtime"), None);
        assert_eq!(cookie.get("Network"), Some(b"v2".as_slice()));
        assert_eq!(cookie.len(), 1);
    }

    #[test]
    fn test_tombstone_for_missing_key_is_noop() {
        let mut cookie = SessionStateCookie::new();
        cookie.apply(SessionStateUpdates::new().remove("nope"));
        assert!(cookie.is_empty());
    }

    #[test]
    fn test_later_entry_wins_within_batch() {
        let mut cookie = SessionStateCookie::new();
        cookie.apply(
            SessionStateUpdates::new()
                .upsert("k", b"a".to_vec())
                .remove("k")
                .upsert("k", b"b".to_vec()),
        );
        assert_eq!(cookie.get("k"), Some(b"b".as_slice()));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut cookie = SessionStateCookie::new();
        cookie.apply(SessionStateUpdates::new().upsert("k", b"v".to_vec()));
        let snapshot = cookie.clone();
        cookie.apply(SessionStateUpdates::new().remove("k"));
        assert_eq!(snapshot.get("k"), Some(b"v".as_slice()));
        assert!(cookie.is_empty());
    }
}
