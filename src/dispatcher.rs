//! Domain handler registration and command dispatch.
//!
//! Browser-side protocol domains plug into the session as [`DomainHandler`]
//! implementations. At construction time each handler is wired into the
//! [`UberDispatcher`], registering the method names it implements; dispatch
//! then routes a parsed command to its handler by exact method name.
//!
//! Handlers respond through a [`Responder`], which serializes to the binary
//! container and converts to JSON text when the client prefers it. The
//! responder is cheap to clone and does not touch session state, so a
//! handler may hold onto one and answer asynchronously.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::codec;
use crate::identifiers::CallId;
use crate::transport::SessionClient;

// ============================================================================
// DomainHandler
// ============================================================================

/// A pluggable browser-side protocol domain.
///
/// Implementations are registered into the session at construction time and
/// receive every command whose method name they wired. Dispatch may answer
/// synchronously through the provided [`Responder`] or stash a clone of it
/// and answer later.
pub trait DomainHandler: Send {
    /// Domain name, e.g. `"Target"`.
    fn name(&self) -> &'static str;

    /// Registers the method names this handler implements.
    fn wire(&mut self, registry: &mut MethodRegistry);

    /// Disables the domain. Called once when the session is disposed.
    fn disable(&mut self) {}

    /// Handles a command routed to this domain.
    fn dispatch(&mut self, call_id: CallId, method: &str, command: &Value, responder: &Responder);
}

// ============================================================================
// MethodRegistry
// ============================================================================

/// Collects the method names a handler implements during wiring.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: Vec<String>,
}

impl MethodRegistry {
    /// Registers one method name.
    pub fn register(&mut self, method: impl Into<String>) {
        self.methods.push(method.into());
    }
}

// ============================================================================
// UberDispatcher
// ============================================================================

/// Routes parsed commands to registered domain handlers by method name.
#[derive(Default)]
pub struct UberDispatcher {
    handlers: Vec<Box<dyn DomainHandler>>,
    methods: FxHashMap<String, usize>,
}

impl UberDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires a handler and takes ownership of it.
    ///
    /// A method registered by two handlers keeps the first registration.
    pub fn add_handler(&mut self, mut handler: Box<dyn DomainHandler>) {
        let mut registry = MethodRegistry::default();
        handler.wire(&mut registry);
        let index = self.handlers.len();
        for method in registry.methods {
            if self.methods.contains_key(&method) {
                warn!(%method, domain = handler.name(), "Duplicate method registration ignored");
                continue;
            }
            self.methods.insert(method, index);
        }
        self.handlers.push(handler);
    }

    /// Returns `true` if a handler is registered for `method`.
    #[inline]
    #[must_use]
    pub fn can_dispatch(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Dispatches a command to its handler.
    ///
    /// Returns `false` when no handler is registered for `method`; the
    /// caller decides whether that means falling through to the agent or
    /// (in browser-only mode) dropping the command.
    pub fn dispatch(
        &mut self,
        call_id: CallId,
        method: &str,
        command: &Value,
        responder: &Responder,
    ) -> bool {
        let Some(&index) = self.methods.get(method) else {
            return false;
        };
        self.handlers[index].dispatch(call_id, method, command, responder);
        true
    }

    /// Disables every handler and clears the registration tables.
    pub fn dispose(&mut self) {
        for handler in &mut self.handlers {
            handler.disable();
        }
        self.handlers.clear();
        self.methods.clear();
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Serializes handler output and delivers it to the session's client.
///
/// Responses and notifications are encoded to the binary container first,
/// then converted to JSON text when the client's fixed protocol preference
/// asks for it — the same path a synthesized error response takes.
#[derive(Clone)]
pub struct Responder {
    client: Arc<dyn SessionClient>,
}

impl Responder {
    pub(crate) fn new(client: Arc<dyn SessionClient>) -> Self {
        Self { client }
    }

    /// Sends a success response for `call_id`.
    pub fn send_response(&self, call_id: CallId, result: Value) {
        self.send_envelope(&json!({
            "id": call_id,
            "result": result,
        }));
    }

    /// Sends an error response for `call_id`.
    pub fn send_error(&self, call_id: CallId, code: i64, message: &str) {
        self.send_envelope(&crate::protocol::error_response(call_id, code, message));
    }

    /// Sends a notification (no call id).
    pub fn send_notification(&self, method: &str, params: Value) {
        self.send_envelope(&json!({
            "method": method,
            "params": params,
        }));
    }

    /// Encodes and delivers a complete envelope to the client.
    ///
    /// A failed JSON conversion is logged and whatever partial output
    /// resulted is delivered anyway; the session layer never hard-fails on
    /// codec errors.
    pub(crate) fn send_envelope(&self, envelope: &Value) {
        let cbor = match codec::encode_binary_message(envelope) {
            Ok(cbor) => cbor,
            Err(e) => {
                error!(error = %e, "Failed to encode protocol envelope");
                return;
            }
        };
        if self.client.uses_binary_protocol() {
            self.client.dispatch_protocol_message(&cbor);
            return;
        }
        let json = match codec::convert_cbor_to_json(&cbor) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to convert response to JSON");
                String::new()
            }
        };
        self.client.dispatch_protocol_message(json.as_bytes());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    struct RecordingClient {
        binary: bool,
        messages: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingClient {
        fn new(binary: bool) -> Arc<Self> {
            Arc::new(Self {
                binary,
                messages: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.messages.lock())
        }
    }

    impl SessionClient for RecordingClient {
        fn dispatch_protocol_message(&self, message: &[u8]) {
            self.messages.lock().push(message.to_vec());
        }

        fn uses_binary_protocol(&self) -> bool {
            self.binary
        }
    }

    struct EchoHandler;

    impl DomainHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn wire(&mut self, registry: &mut MethodRegistry) {
            registry.register("Echo.echo");
            registry.register("Echo.silence");
        }

        fn dispatch(
            &mut self,
            call_id: CallId,
            method: &str,
            command: &Value,
            responder: &Responder,
        ) {
            if method == "Echo.echo" {
                let params = command.get("params").cloned().unwrap_or(Value::Null);
                responder.send_response(call_id, params);
            }
        }
    }

    #[test]
    fn test_can_dispatch_registered_methods() {
        let mut dispatcher = UberDispatcher::new();
        dispatcher.add_handler(Box::new(EchoHandler));
        assert!(dispatcher.can_dispatch("Echo.echo"));
        assert!(dispatcher.can_dispatch("Echo.silence"));
        assert!(!dispatcher.can_dispatch("Echo.unknown"));
        assert!(!dispatcher.can_dispatch("Runtime.evaluate"));
    }

    #[test]
    fn test_dispatch_routes_to_handler() {
        let client = RecordingClient::new(false);
        let responder = Responder::new(client.clone());
        let mut dispatcher = UberDispatcher::new();
        dispatcher.add_handler(Box::new(EchoHandler));

        let command = json!({"id": 1, "method": "Echo.echo", "params": {"x": 1}});
        assert!(dispatcher.dispatch(CallId::new(1), "Echo.echo", &command, &responder));

        let messages = client.take();
        assert_eq!(messages.len(), 1);
        let response: Value = serde_json::from_slice(&messages[0]).expect("json");
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["x"], json!(1));
    }

    #[test]
    fn test_dispatch_unknown_method_returns_false() {
        let client = RecordingClient::new(false);
        let responder = Responder::new(client.clone());
        let mut dispatcher = UberDispatcher::new();
        dispatcher.add_handler(Box::new(EchoHandler));

        let command = json!({"id": 1, "method": "Other.method"});
        assert!(!dispatcher.dispatch(CallId::new(1), "Other.method", &command, &responder));
        assert!(client.take().is_empty());
    }

    #[test]
    fn test_responder_binary_client_gets_cbor() {
        let client = RecordingClient::new(true);
        let responder = Responder::new(client.clone());
        responder.send_response(CallId::new(2), json!({"ok": true}));

        let messages = client.take();
        assert_eq!(messages.len(), 1);
        assert!(codec::is_binary_message(&messages[0]));
        let value = codec::parse_binary_message(&messages[0]).expect("cbor");
        assert_eq!(value["id"], json!(2));
        assert_eq!(value["result"]["ok"], json!(true));
    }

    #[test]
    fn test_responder_notification_has_no_call_id() {
        let client = RecordingClient::new(false);
        let responder = Responder::new(client.clone());
        responder.send_notification("Echo.pinged", json!({"seq": 7}));

        let messages = client.take();
        let value: Value = serde_json::from_slice(&messages[0]).expect("json");
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], json!("Echo.pinged"));
        assert_eq!(value["params"]["seq"], json!(7));
    }

    #[test]
    fn test_dispose_disables_handlers_once() {
        struct CountingHandler {
            disabled: Arc<Mutex<u32>>,
        }

        impl DomainHandler for CountingHandler {
            fn name(&self) -> &'static str {
                "Counting"
            }

            fn wire(&mut self, registry: &mut MethodRegistry) {
                registry.register("Counting.noop");
            }

            fn disable(&mut self) {
                *self.disabled.lock() += 1;
            }

            fn dispatch(&mut self, _: CallId, _: &str, _: &Value, _: &Responder) {}
        }

        let disabled = Arc::new(Mutex::new(0));
        let mut dispatcher = UberDispatcher::new();
        dispatcher.add_handler(Box::new(CountingHandler {
            disabled: disabled.clone(),
        }));

        dispatcher.dispose();
        dispatcher.dispose();
        assert_eq!(*disabled.lock(), 1);
        assert!(!dispatcher.can_dispatch("Counting.noop"));
    }
}
