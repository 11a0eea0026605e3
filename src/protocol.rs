//! Protocol envelope fields and method classification.
//!
//! Messages are structured maps with a small set of well-known top-level
//! fields:
//!
//! | Field | Type | Purpose |
//! |-------|------|---------|
//! | `id` | integer | Command/response correlation ([`CallId`]) |
//! | `method` | string | `Domain.command` method name |
//! | `sessionId` | string | Child session routing tag (optional) |
//!
//! This module also owns the two method allow-lists that drive routing
//! decisions in the session: which commands go over the dedicated
//! interrupt channel, and which in-flight commands cannot be answered
//! after a cross-process navigation.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::identifiers::CallId;

// ============================================================================
// Envelope Fields
// ============================================================================

/// Top-level call id field.
pub const CALL_ID_FIELD: &str = "id";

/// Top-level method field.
pub const METHOD_FIELD: &str = "method";

/// Top-level child session routing field.
pub const SESSION_ID_FIELD: &str = "sessionId";

/// One-shot resume hook method: observing this command fires the registered
/// runtime-resume callback exactly once.
pub const RESUME_METHOD: &str = "Runtime.runIfWaitingForDebugger";

// ============================================================================
// Error Responses
// ============================================================================

/// Server-error status code carried on synthesized error responses.
pub const SERVER_ERROR: i64 = -32000;

/// Status code for a command no registered handler implements.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Error message synthesized for in-flight commands that cannot survive a
/// cross-process navigation. Clients match against this string verbatim;
/// it is a wire-protocol contract, not an implementation detail.
pub const TARGET_CLOSED_MESSAGE: &str = "Inspected target navigated or closed";

/// Builds a protocol error response envelope.
#[must_use]
pub fn error_response(call_id: CallId, code: i64, message: &str) -> Value {
    json!({
        "id": call_id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

// ============================================================================
// Command Parsing
// ============================================================================

/// Extracts the call id and method from a parsed command message.
///
/// Returns `None` when either field is missing or has the wrong type;
/// malformed commands are dropped silently by the caller, so there is no
/// error variant for this.
#[must_use]
pub fn parse_command(message: &Value) -> Option<(CallId, &str)> {
    let call_id = message.get(CALL_ID_FIELD)?.as_i64()?;
    let call_id = i32::try_from(call_id).ok()?;
    let method = message.get(METHOD_FIELD)?.as_str()?;
    Some((CallId::new(call_id), method))
}

/// Extracts the method name, if present.
#[must_use]
pub fn method_of(message: &Value) -> Option<&str> {
    message.get(METHOD_FIELD)?.as_str()
}

/// Extracts the child session routing tag, if present.
#[must_use]
pub fn session_id_of(message: &Value) -> Option<&str> {
    message.get(SESSION_ID_FIELD)?.as_str()
}

// ============================================================================
// Method Classification
// ============================================================================

/// Returns `true` if `method` must be sent over the dedicated interrupt
/// channel rather than the general channel.
///
/// These commands must reach a target that may be blocked in a busy loop or
/// parked at a breakpoint; the general channel could itself be blocked
/// behind an earlier command.
#[must_use]
pub fn should_send_on_io(method: &str) -> bool {
    matches!(
        method,
        "Debugger.pause"
            | "Debugger.setBreakpoint"
            | "Debugger.setBreakpointByUrl"
            | "Debugger.removeBreakpoint"
            | "Debugger.setBreakpointsActive"
            | "Debugger.getStackTrace"
            | "Performance.getMetrics"
            | "Page.crash"
            | "Runtime.terminateExecution"
            | "Emulation.setScriptExecutionDisabled"
    )
}

/// Returns `true` if an in-flight `method` is unanswerable after a
/// cross-process navigation and must be failed with
/// [`TARGET_CLOSED_MESSAGE`] instead of being replayed.
///
/// Control-style commands (enables, breakpoints) are idempotent and safe to
/// replay against the new target; evaluation-style Runtime commands are
/// not, since their execution context is gone.
#[must_use]
pub fn terminate_on_cross_process_navigation(method: &str) -> bool {
    matches!(
        method,
        "Runtime.evaluate"
            | "Runtime.awaitPromise"
            | "Runtime.callFunctionOn"
            | "Runtime.runScript"
            | "Runtime.terminateExecution"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let message = json!({"id": 3, "method": "Runtime.evaluate", "params": {}});
        let (call_id, method) = parse_command(&message).expect("parse");
        assert_eq!(call_id, CallId::new(3));
        assert_eq!(method, "Runtime.evaluate");
    }

    #[test]
    fn test_parse_command_missing_fields() {
        assert!(parse_command(&json!({"method": "Runtime.evaluate"})).is_none());
        assert!(parse_command(&json!({"id": 3})).is_none());
        assert!(parse_command(&json!({"id": "3", "method": "m"})).is_none());
        assert!(parse_command(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_session_id_of() {
        let message = json!({"id": 1, "method": "m", "sessionId": "S1"});
        assert_eq!(session_id_of(&message), Some("S1"));
        assert_eq!(session_id_of(&json!({"id": 1})), None);
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(CallId::new(9), SERVER_ERROR, TARGET_CLOSED_MESSAGE);
        assert_eq!(response["id"], json!(9));
        assert_eq!(response["error"]["code"], json!(-32000));
        assert_eq!(
            response["error"]["message"],
            json!("Inspected target navigated or closed")
        );
    }

    #[test]
    fn test_io_channel_classification() {
        assert!(should_send_on_io("Debugger.pause"));
        assert!(should_send_on_io("Page.crash"));
        assert!(!should_send_on_io("Runtime.evaluate"));
        assert!(!should_send_on_io("Page.navigate"));
    }

    #[test]
    fn test_navigation_termination_classification() {
        assert!(terminate_on_cross_process_navigation("Runtime.evaluate"));
        assert!(terminate_on_cross_process_navigation("Runtime.awaitPromise"));
        assert!(!terminate_on_cross_process_navigation("CSS.enable"));
        assert!(!terminate_on_cross_process_navigation("Debugger.pause"));
    }
}
