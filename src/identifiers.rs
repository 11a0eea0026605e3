//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! # Identifier Types
//!
//! | Type | Underlying | Purpose |
//! |------|------------|---------|
//! | [`CallId`] | `i32` | Command/response correlation |
//! | [`SessionId`] | `String` | Child session routing |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// CallId
// ============================================================================

/// Per-session-unique integer correlating a command to its response.
///
/// Call ids are issued by the client (or the session on its behalf) and
/// echoed back on the matching response. The `Ord` impl matters: in-flight
/// bookkeeping iterates call ids in ascending order, which matches command
/// submission order since ids are issued monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(i32);

impl CallId {
    /// Creates a call id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw integer value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for CallId {
    #[inline]
    fn from(id: i32) -> Self {
        Self(id)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Identifier addressing a child session nested under a root session.
///
/// Generated by whoever requests the child attachment; carried on messages
/// as the `sessionId` envelope field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from a string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    #[inline]
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    #[inline]
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
