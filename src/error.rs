//! Error types for the DevTools session layer.
//!
//! This module defines all error types used throughout the crate.
//!
//! Most failure paths in the session layer are deliberately *not* surfaced
//! as errors: malformed commands are dropped, unreachable agents swallow
//! the send, and codec failures are logged and degraded (see the crate
//! docs). [`Error`] exists for the places where a caller can actually act
//! on the failure — chiefly the [`codec`](crate::codec) conversions.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Codec | [`Error::Codec`], [`Error::Json`] |
//! | Envelope | [`Error::InvalidEnvelope`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// CBOR encode/decode failure.
    ///
    /// Returned when a message cannot be converted to or from the binary
    /// container format.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the conversion failure.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message envelope has the wrong shape.
    ///
    /// Returned when a structural operation (such as tagging a message with
    /// a session id) requires a top-level map and the message is not one.
    #[error("Invalid envelope: {message}")]
    InvalidEnvelope {
        /// Description of the structural problem.
        message: String,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a codec error.
    #[inline]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid envelope error.
    #[inline]
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a conversion (codec or JSON) error.
    #[inline]
    #[must_use]
    pub fn is_conversion_error(&self) -> bool {
        matches!(self, Self::Codec { .. } | Self::Json(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::codec("truncated map");
        assert_eq!(err.to_string(), "Codec error: truncated map");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.is_conversion_error());
    }

    #[test]
    fn test_invalid_envelope() {
        let err = Error::invalid_envelope("top-level value is an array");
        assert!(!err.is_conversion_error());
        assert!(err.to_string().contains("array"));
    }
}
