//! Protocol session orchestration.
//!
//! A [`Session`] sits between one client (a debugging front-end) and the
//! backends it instruments: browser-side domain handlers, a remote agent
//! reachable over two asynchronous channels, and optionally a fully
//! external proxy backend.
//!
//! # Message Flow
//!
//! ```text
//! client ──► dispatch_protocol_message
//!               │ normalize to binary
//!               │ sessionId routing (root vs. child)
//!               │ parse call id / method
//!               ├─► domain handler ──► Responder ──► client
//!               └─► fall through
//!                      ├─ suspended: buffer (FIFO)
//!                      └─ else: agent channel + in-flight record
//!
//! agent ──► dispatch_protocol_response / _notification
//!               │ apply state cookie diff
//!               │ drop in-flight record (response only)
//!               └─► client (raw bytes, agent already speaks client format)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cookie` | Session state cookie and incremental updates |
//! | `pending` | In-flight tracker and suspend/resume buffer |

// ============================================================================
// Submodules
// ============================================================================

/// Session state cookie and incremental updates.
pub mod cookie;

mod pending;

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::codec;
use crate::dispatcher::{DomainHandler, Responder, UberDispatcher};
use crate::identifiers::{CallId, SessionId};
use crate::protocol;
use crate::transport::{
    Agent, AgentChannels, AgentHost, AttachRequest, CommandInterceptor, DispatchContinuation,
    ExternalAgentProxy, SessionClient,
};

use pending::{PendingCommands, SuspendQueue, SuspendedMessage};

// ============================================================================
// Re-exports
// ============================================================================

pub use cookie::{SessionStateCookie, SessionStateUpdates};

// ============================================================================
// SessionInner
// ============================================================================

/// Session state, exclusively owned and mutated behind the session's mutex.
struct SessionInner {
    /// The attached client. Protocol preference is fixed per instance.
    client: Arc<dyn SessionClient>,

    /// Domain handler routing. `None` after disposal.
    dispatcher: Option<UberDispatcher>,

    /// Browser-only sessions never forward to an agent.
    browser_only: bool,

    /// External proxy backend, when this session has been turned into a
    /// proxy. Mutually exclusive with child-session dispatch.
    proxy: Option<Arc<dyn ExternalAgentProxy>>,

    /// Channel bindings into the attached agent. `None` while detached.
    channels: Option<AgentChannels>,

    /// Incremental agent-side state snapshot. `None` until the first
    /// attach completes; presence marks later attaches as reattaches.
    state_cookie: Option<SessionStateCookie>,

    /// Commands forwarded to the agent, awaiting their responses.
    pending: PendingCommands,

    /// Commands held back while suspended.
    suspended_messages: SuspendQueue,

    /// Logical suspension flag; outbound commands buffer while set.
    suspended_sending_messages_to_agent: bool,

    /// Non-owning routing entries for nested sessions. The agent host that
    /// attached a child owns it; a dead entry behaves as unregistered.
    child_sessions: FxHashMap<SessionId, Weak<Mutex<SessionInner>>>,

    /// One-shot hook fired when the resume method is observed.
    runtime_resume: Option<Box<dyn FnOnce() + Send>>,

    /// Optional pre-dispatch command hook.
    interceptor: Option<Arc<dyn CommandInterceptor>>,

    /// Back link to the root, set for sessions created through child
    /// attachment. Non-owning; the root does not keep children alive
    /// either.
    parent: Option<Weak<Mutex<SessionInner>>>,

    /// Set once by [`Session::dispose`]; local dispatch becomes a no-op.
    disposed: bool,
}

// ============================================================================
// Session
// ============================================================================

/// A bidirectional protocol session multiplexer.
///
/// Cheap to clone; clones share the same underlying session. All entry
/// points run synchronously to completion on the caller's thread; the only
/// asynchronous waits are external (agent replies, interceptor decisions),
/// which re-enter through the session's own entry points.
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ============================================================================
// Session - Construction & Wiring
// ============================================================================

impl Session {
    /// Creates a session for an attaching client.
    #[must_use]
    pub fn new(client: Arc<dyn SessionClient>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                client,
                dispatcher: Some(UberDispatcher::new()),
                browser_only: false,
                proxy: None,
                channels: None,
                state_cookie: None,
                pending: PendingCommands::default(),
                suspended_messages: SuspendQueue::default(),
                suspended_sending_messages_to_agent: false,
                child_sessions: FxHashMap::default(),
                runtime_resume: None,
                interceptor: None,
                parent: None,
                disposed: false,
            })),
        }
    }

    /// Wires a domain handler into the session.
    ///
    /// No-op after disposal.
    pub fn add_handler(&self, handler: Box<dyn DomainHandler>) {
        let mut inner = self.inner.lock();
        if let Some(dispatcher) = inner.dispatcher.as_mut() {
            dispatcher.add_handler(handler);
        }
    }

    /// Marks the session as browser-only: every command is dispatched
    /// locally and nothing is ever forwarded to an agent.
    pub fn set_browser_only(&self, browser_only: bool) {
        self.inner.lock().browser_only = browser_only;
    }

    /// Registers the one-shot callback fired when the client sends the
    /// resume method (`Runtime.runIfWaitingForDebugger`).
    pub fn set_runtime_resume(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.lock().runtime_resume = Some(Box::new(callback));
    }

    /// Registers the pre-dispatch command interception hook.
    pub fn set_command_interceptor(&self, interceptor: Arc<dyn CommandInterceptor>) {
        self.inner.lock().interceptor = Some(interceptor);
    }

    /// Turns the session into a pass-through for an external backend.
    ///
    /// From this point client messages are forwarded verbatim (as JSON) and
    /// no local parsing occurs. A proxy session can never host child
    /// sessions.
    pub fn turn_into_external_proxy(&self, proxy: Arc<dyn ExternalAgentProxy>) {
        {
            let mut inner = self.inner.lock();
            debug_assert!(
                inner.parent.is_none(),
                "a child session cannot become a proxy"
            );
            inner.proxy = Some(Arc::clone(&proxy));
        }
        proxy.attach(self);
    }

    /// Returns a responder delivering to this session's client.
    ///
    /// Useful for interceptors and embedders that answer commands outside
    /// the normal dispatch path.
    #[must_use]
    pub fn responder(&self) -> Responder {
        Responder::new(self.inner.lock().client.clone())
    }

    /// Returns `true` if this session was created as a child session.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.inner.lock().parent.is_some()
    }

    /// Returns the root of this session's tree: the session itself, or the
    /// parent it was attached under when created as a child.
    ///
    /// `None` for a child whose root has already been dropped.
    #[must_use]
    pub fn root_session(&self) -> Option<Session> {
        let parent = self.inner.lock().parent.clone();
        match parent {
            Some(parent) => parent.upgrade().map(|inner| Session { inner }),
            None => Some(self.clone()),
        }
    }
}

// ============================================================================
// Session - Client-Facing Dispatch
// ============================================================================

impl Session {
    /// Dispatches a message arriving from the client.
    ///
    /// Returns `true` if the message was taken (including silent drops of
    /// malformed commands); `false` only when a `sessionId` tag names an
    /// unregistered child session.
    pub fn dispatch_protocol_message(&self, message: &[u8]) -> bool {
        let (proxy, uses_binary) = {
            let inner = self.inner.lock();
            (inner.proxy.clone(), inner.client.uses_binary_protocol())
        };

        // Proxy mode: the message goes to an external backend, which
        // speaks JSON. No local parsing.
        if let Some(proxy) = proxy {
            if uses_binary {
                debug_assert!(codec::is_binary_message(message));
                let json = match codec::convert_cbor_to_json(message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "Failed to convert proxied message to JSON");
                        String::new()
                    }
                };
                proxy.send_message_to_backend(self, &json);
            } else {
                proxy.send_message_to_backend(self, &String::from_utf8_lossy(message));
            }
            return true;
        }

        // Normalize to the canonical binary form.
        let binary: Vec<u8> = if uses_binary {
            debug_assert!(codec::is_binary_message(message));
            message.to_vec()
        } else {
            match codec::convert_json_to_cbor(&String::from_utf8_lossy(message)) {
                Ok(binary) => binary,
                Err(e) => {
                    error!(error = %e, "Failed to convert client message to binary");
                    Vec::new()
                }
            }
        };

        let value = match codec::parse_binary_message(&binary) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Unparseable client message");
                None
            }
        };

        let session_id = value
            .as_ref()
            .and_then(protocol::session_id_of)
            .map(SessionId::from);

        let Some(session_id) = session_id else {
            return self.dispatch_internal(binary, value);
        };

        // Route to the child session named by the tag.
        let child = {
            let inner = self.inner.lock();
            inner
                .child_sessions
                .get(&session_id)
                .and_then(Weak::upgrade)
        };
        match child {
            Some(child_inner) => {
                let child = Session { inner: child_inner };
                debug_assert!(
                    child.inner.lock().proxy.is_none(),
                    "a proxy session must never be a child dispatch target"
                );
                child.dispatch_internal(binary, value)
            }
            None => false,
        }
    }

    /// Dispatches an already-normalized message on this session.
    fn dispatch_internal(&self, raw: Vec<u8>, value: Option<Value>) -> bool {
        let method = value
            .as_ref()
            .and_then(protocol::method_of)
            .map(str::to_string);

        // One-shot runtime resume hook.
        if method.as_deref() == Some(protocol::RESUME_METHOD) {
            let callback = self.inner.lock().runtime_resume.take();
            if let Some(callback) = callback {
                callback();
            }
        }

        let interceptor = self.inner.lock().interceptor.clone();
        match (interceptor, method) {
            (Some(interceptor), Some(method)) => {
                let continuation = DispatchContinuation::new(
                    self.clone(),
                    value.unwrap_or(Value::Null),
                    raw.clone(),
                );
                interceptor.handle_command(&method, &raw, continuation);
            }
            _ => self.handle_command(value.unwrap_or(Value::Null), raw),
        }
        true
    }

    /// Parses and routes one command: local domain dispatch or fallthrough
    /// to the agent. Malformed commands are dropped silently.
    pub(crate) fn handle_command(&self, value: Value, raw: Vec<u8>) {
        let Some((call_id, method)) = protocol::parse_command(&value) else {
            trace!("Dropping malformed command");
            return;
        };
        let method = method.to_string();

        let mut inner = self.inner.lock();
        let locally_dispatchable = inner
            .dispatcher
            .as_ref()
            .is_some_and(|d| d.can_dispatch(&method));

        if !inner.browser_only && !locally_dispatchable {
            inner.fall_through(call_id, &method, raw);
            return;
        }

        // Local dispatch delivers to the client, and the client is allowed
        // to act on the session synchronously during delivery. The
        // dispatcher is taken out so the lock can be released around it.
        let responder = Responder::new(inner.client.clone());
        let Some(mut dispatcher) = inner.dispatcher.take() else {
            return;
        };
        drop(inner);

        let handled = dispatcher.dispatch(call_id, &method, &value, &responder);
        if !handled {
            responder.send_error(
                call_id,
                protocol::METHOD_NOT_FOUND,
                &format!("'{method}' wasn't found"),
            );
        }

        let mut inner = self.inner.lock();
        if inner.disposed {
            // Disposal raced with the dispatch; finish it here.
            dispatcher.dispose();
        } else {
            inner.dispatcher = Some(dispatcher);
        }
    }
}

// ============================================================================
// Session - Agent Attachment
// ============================================================================

impl Session {
    /// (Re)binds the session to an agent, or detaches it.
    ///
    /// `None` resets both channel bindings; subsequent agent sends no-op.
    /// Otherwise any prior bindings are torn down first, fresh channels are
    /// created with the cloned state cookie and the client's protocol
    /// preference, and in-flight commands are reconciled:
    ///
    /// - not suspended: every in-flight command is re-sent to the new
    ///   binding, in submission order;
    /// - suspended: in-flight commands whose method cannot survive a
    ///   cross-process navigation are failed with a synthesized
    ///   server-error response; the rest move, in order, to the front of
    ///   the suspend buffer for replay on resume.
    pub fn attach_to_agent(&self, agent: Option<&dyn Agent>) {
        let (client, terminated) = {
            let mut inner = self.inner.lock();

            let Some(agent) = agent else {
                inner.channels = None;
                return;
            };

            // No dual-bound state: tear down before rebinding.
            if inner.channels.is_some() {
                inner.channels = None;
            }

            let request = AttachRequest {
                state_cookie: inner.state_cookie.clone(),
                uses_binary_protocol: inner.client.uses_binary_protocol(),
            };
            inner.channels = Some(agent.attach_session(request));

            let mut terminated = Vec::new();
            if !inner.suspended_sending_messages_to_agent {
                // Outstanding queries are still meaningful against the new
                // target; re-send them rather than assume they are lost.
                let records: Vec<(CallId, String, Vec<u8>)> = inner
                    .pending
                    .iter()
                    .map(|(id, m)| (id, m.method.clone(), m.message.clone()))
                    .collect();
                for (call_id, method, message) in records {
                    inner.dispatch_to_agent(call_id, &method, &message);
                }
            } else {
                let records = inner.pending.drain_ordered();
                let mut survivors = Vec::with_capacity(records.len());
                for (call_id, message) in records {
                    if protocol::terminate_on_cross_process_navigation(&message.method) {
                        // The old agent will never answer; fail visibly
                        // with the client-matchable message.
                        terminated.push(call_id);
                    } else {
                        survivors.push(SuspendedMessage {
                            call_id,
                            method: message.method,
                            message: message.message,
                        });
                    }
                }
                inner.suspended_messages.requeue_front(survivors);
            }

            // Seed an empty cookie so the next attach is seen as a reattach.
            if inner.state_cookie.is_none() {
                inner.state_cookie = Some(SessionStateCookie::new());
            }

            (inner.client.clone(), terminated)
        };

        // Deliver with the lock released; the client may act on the session
        // synchronously during delivery.
        let responder = Responder::new(client);
        for call_id in terminated {
            responder.send_error(
                call_id,
                protocol::SERVER_ERROR,
                protocol::TARGET_CLOSED_MESSAGE,
            );
        }
    }

    /// Resets both channel bindings after the agent transport went away.
    pub fn channel_disconnected(&self) {
        self.inner.lock().channels = None;
    }

    /// Tears the session down after the client connection closed.
    ///
    /// Resets the agent bindings and notifies the client; actual
    /// destruction is the embedder's responsibility.
    pub fn connection_closed(&self) {
        let client = {
            let mut inner = self.inner.lock();
            inner.channels = None;
            inner.client.clone()
        };
        client.agent_host_closed();
    }
}

// ============================================================================
// Session - Suspend / Resume
// ============================================================================

impl Session {
    /// Suspends outbound agent traffic; subsequent fallthrough commands
    /// buffer in FIFO order instead of being sent.
    ///
    /// Illegal on browser-only sessions.
    pub fn suspend_sending_messages_to_agent(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.browser_only);
        inner.suspended_sending_messages_to_agent = true;
    }

    /// Clears the suspension flag and replays every buffered command, in
    /// original order, re-promoting each to an in-flight record.
    pub fn resume_sending_messages_to_agent(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.browser_only);
        inner.suspended_sending_messages_to_agent = false;
        let buffered = inner.suspended_messages.drain();
        for message in buffered {
            inner.dispatch_to_agent(message.call_id, &message.method, &message.message);
            inner
                .pending
                .insert(message.call_id, message.method, message.message);
        }
    }
}

// ============================================================================
// Session - Agent-Facing Delivery
// ============================================================================

impl Session {
    /// Delivers an agent response to the client.
    ///
    /// State cookie updates are applied *before* delivery so a follow-up
    /// command triggered by this response observes consistent replay state
    /// on a later reattach. The in-flight record for `call_id` is removed
    /// best-effort. The payload is passed through unmodified; the agent
    /// already speaks the client's format (fixed at attach time).
    pub fn dispatch_protocol_response(
        &self,
        message: &[u8],
        call_id: CallId,
        updates: Option<SessionStateUpdates>,
    ) {
        let client = {
            let mut inner = self.inner.lock();
            inner.apply_session_state_updates(updates);
            inner.pending.remove(call_id);
            inner.client.clone()
        };
        client.dispatch_protocol_message(message);
    }

    /// Delivers an agent notification to the client. Cookie updates are
    /// applied first, same as for responses.
    pub fn dispatch_protocol_notification(
        &self,
        message: &[u8],
        updates: Option<SessionStateUpdates>,
    ) {
        let client = {
            let mut inner = self.inner.lock();
            inner.apply_session_state_updates(updates);
            inner.client.clone()
        };
        client.dispatch_protocol_message(message);
    }

    /// Delivers a message of unknown encoding (from a proxy backend or a
    /// peer session) to the client, auto-detecting the container format and
    /// converting to the client's preference as needed.
    pub fn dispatch_on_client_host(&self, message: &[u8]) {
        let client = self.inner.lock().client.clone();
        let is_binary = codec::is_binary_message(message);
        if client.uses_binary_protocol() == is_binary {
            client.dispatch_protocol_message(message);
            return;
        }
        let converted: Vec<u8> = if client.uses_binary_protocol() {
            match codec::convert_json_to_cbor(&String::from_utf8_lossy(message)) {
                Ok(binary) => binary,
                Err(e) => {
                    error!(error = %e, "Failed to convert message for binary client");
                    Vec::new()
                }
            }
        } else {
            match codec::convert_cbor_to_json(message) {
                Ok(json) => json.into_bytes(),
                Err(e) => {
                    error!(error = %e, "Failed to convert message for text client");
                    Vec::new()
                }
            }
        };
        client.dispatch_protocol_message(&converted);
    }
}

// ============================================================================
// Session - Child Sessions
// ============================================================================

impl Session {
    /// Creates and registers a child session scoped to a sub-target.
    ///
    /// The child is attached to `agent_host`, which takes ownership; the
    /// registry keeps only a non-owning routing entry. Returns `None` when
    /// the host rejects the attachment (the partially constructed child is
    /// discarded), or when called on a proxy-mode or child session.
    ///
    /// Precondition: `client` has no existing session on `agent_host`.
    pub fn attach_child_session(
        &self,
        session_id: SessionId,
        agent_host: &dyn AgentHost,
        client: Arc<dyn SessionClient>,
    ) -> Option<Session> {
        {
            let inner = self.inner.lock();
            debug_assert!(inner.proxy.is_none(), "proxy sessions cannot host children");
            debug_assert!(inner.parent.is_none(), "child sessions cannot be nested");
            if inner.proxy.is_some() || inner.parent.is_some() {
                return None;
            }
        }

        let child = Session::new(client);
        child.inner.lock().parent = Some(Arc::downgrade(&self.inner));
        if !agent_host.attach(child.clone()) {
            return None;
        }
        self.inner
            .lock()
            .child_sessions
            .insert(session_id, Arc::downgrade(&child.inner));
        Some(child)
    }

    /// Removes the routing entry for a child session.
    ///
    /// Does not dispose the child; its agent-host attachment owns it.
    pub fn detach_child_session(&self, session_id: &SessionId) {
        self.inner.lock().child_sessions.remove(session_id);
    }

    /// Forwards a child session's (binary) output to the root's client,
    /// tagged with the child's session id.
    ///
    /// No-op for unregistered ids; a tagging failure aborts delivery.
    pub fn send_message_from_child_session(&self, session_id: &SessionId, message: &[u8]) {
        let registered = {
            let inner = self.inner.lock();
            inner
                .child_sessions
                .get(session_id)
                .and_then(Weak::upgrade)
                .is_some()
        };
        if !registered {
            return;
        }

        debug_assert!(codec::is_binary_message(message));
        let patched = match codec::append_session_id(message, session_id.as_str()) {
            Ok(patched) => patched,
            Err(e) => {
                error!(error = %e, %session_id, "Failed to tag child session message");
                return;
            }
        };

        let client = self.inner.lock().client.clone();
        if client.uses_binary_protocol() {
            client.dispatch_protocol_message(&patched);
            return;
        }
        let json = match codec::convert_cbor_to_json(&patched) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to convert child session message to JSON");
                String::new()
            }
        };
        client.dispatch_protocol_message(json.as_bytes());
    }
}

// ============================================================================
// Session - Disposal & Introspection
// ============================================================================

impl Session {
    /// Disposes the session: domain handlers are disabled and cleared, the
    /// external proxy (if any) is detached. Safe to call more than once.
    ///
    /// In-flight agent requests are not cancelled; a late response simply
    /// has nowhere to go.
    pub fn dispose(&self) {
        let proxy = {
            let mut inner = self.inner.lock();
            inner.disposed = true;
            if let Some(mut dispatcher) = inner.dispatcher.take() {
                dispatcher.dispose();
            }
            inner.proxy.take()
        };
        if let Some(proxy) = proxy {
            proxy.detach(self);
        }
    }

    /// Returns the number of in-flight agent requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Returns the number of commands buffered while suspended.
    #[inline]
    #[must_use]
    pub fn suspended_count(&self) -> usize {
        self.inner.lock().suspended_messages.len()
    }

    /// Returns `true` while outbound agent traffic is suspended.
    #[inline]
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended_sending_messages_to_agent
    }

    /// Returns `true` while agent channels are bound.
    #[inline]
    #[must_use]
    pub fn has_agent(&self) -> bool {
        self.inner.lock().channels.is_some()
    }

    /// Returns a snapshot of the current state cookie, if any exchange or
    /// attach has produced one.
    #[must_use]
    pub fn state_cookie(&self) -> Option<SessionStateCookie> {
        self.inner.lock().state_cookie.clone()
    }
}

// ============================================================================
// SessionInner - Fallthrough Path
// ============================================================================

impl SessionInner {
    /// Routes a command the local dispatcher did not take: buffer while
    /// suspended, otherwise send and track as in-flight.
    fn fall_through(&mut self, call_id: CallId, method: &str, message: Vec<u8>) {
        // Browser-only sessions handle everything in the dispatcher.
        debug_assert!(!self.browser_only);

        if self.suspended_sending_messages_to_agent {
            self.suspended_messages.push_back(SuspendedMessage {
                call_id,
                method: method.to_string(),
                message,
            });
            return;
        }

        self.dispatch_to_agent(call_id, method, &message);
        self.pending.insert(call_id, method, message);
    }

    /// Sends a command over the appropriate agent channel.
    ///
    /// Interrupt-class methods use the dedicated channel so they are not
    /// queued behind a blocked general channel. A detached agent swallows
    /// the send; no error is synthesized.
    fn dispatch_to_agent(&self, call_id: CallId, method: &str, message: &[u8]) {
        debug_assert!(!self.browser_only);
        let Some(channels) = self.channels.as_ref() else {
            debug!(%call_id, method, "Agent detached; dropping command");
            return;
        };
        if protocol::should_send_on_io(method) {
            channels.io.dispatch_protocol_command(call_id, method, message);
        } else {
            channels.main.dispatch_protocol_command(call_id, method, message);
        }
    }

    /// Folds an incremental cookie diff into the held cookie.
    fn apply_session_state_updates(&mut self, updates: Option<SessionStateUpdates>) {
        let Some(updates) = updates else {
            return;
        };
        self.state_cookie
            .get_or_insert_with(SessionStateCookie::new)
            .apply(updates);
    }
}

// ============================================================================
// Tests
// ============================================================================
