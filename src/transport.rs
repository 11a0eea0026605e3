//! Collaborator contracts at the session boundary.
//!
//! The session layer is entirely in-process; no bytes cross a socket here.
//! Its "external interfaces" are the four collaborator seams it depends on,
//! expressed as trait objects:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`SessionClient`] | The debugging front-end attached to the session |
//! | [`Agent`] / [`AgentChannel`] | The instrumented target's transport |
//! | [`ExternalAgentProxy`] | Optional fully external backend |
//! | [`AgentHost`] | Owner of child session attachments |
//! | [`CommandInterceptor`] | Optional pre-dispatch command hook |
//!
//! # Re-entrancy contract
//!
//! The session assumes a single-threaded reactor: implementations must not
//! call back into the session from inside these trait methods. Replies and
//! notifications are delivered later through the session's own entry points
//! (mirroring the always-asynchronous message pipes of the environment this
//! layer is modeled on).

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::identifiers::CallId;
use crate::session::{Session, SessionStateCookie};

// ============================================================================
// SessionClient
// ============================================================================

/// The client (debugging front-end) attached to a session.
pub trait SessionClient: Send + Sync {
    /// Delivers a response or notification to the client.
    ///
    /// The payload is JSON text or a binary message depending on
    /// [`uses_binary_protocol`](Self::uses_binary_protocol).
    fn dispatch_protocol_message(&self, message: &[u8]);

    /// Whether this client speaks the binary protocol.
    ///
    /// Fixed per client instance; the session reads it once per delivery
    /// and at agent attach time.
    fn uses_binary_protocol(&self) -> bool {
        false
    }

    /// Notifies the client that the agent host went away.
    fn agent_host_closed(&self) {}
}

// ============================================================================
// Agent
// ============================================================================

/// One of the two independently ordered command channels into the agent.
///
/// Commands preserve submission order per channel; no cross-channel
/// ordering is guaranteed (the interrupt channel exists to jump the queue).
pub trait AgentChannel: Send {
    /// Forwards a serialized command to the agent.
    fn dispatch_protocol_command(&self, call_id: CallId, method: &str, message: &[u8]);
}

/// The pair of channel bindings produced by an attach.
pub struct AgentChannels {
    /// General command/response channel.
    pub main: Box<dyn AgentChannel>,
    /// Dedicated interrupt channel for commands that must reach a blocked
    /// target.
    pub io: Box<dyn AgentChannel>,
}

/// Parameters handed to the agent when (re)building its session endpoint.
pub struct AttachRequest {
    /// Cloned session state cookie. `None` on the first-ever attach; an
    /// empty-but-present cookie on later attaches tells the agent to
    /// *reattach* (restore state) rather than attach fresh.
    pub state_cookie: Option<SessionStateCookie>,
    /// The client's fixed protocol-format preference. The agent produces
    /// output in this format for the lifetime of the binding.
    pub uses_binary_protocol: bool,
}

/// The instrumented target, reachable only through asynchronous channels.
pub trait Agent {
    /// Creates a fresh pair of channel bindings for a session.
    fn attach_session(&self, request: AttachRequest) -> AgentChannels;
}

// ============================================================================
// ExternalAgentProxy
// ============================================================================

/// Alternate backend replacing the normal agent transport when the session
/// is turned into a proxy.
pub trait ExternalAgentProxy: Send + Sync {
    /// Called when a session becomes a proxy for this backend.
    fn attach(&self, session: &Session) {
        let _ = session;
    }

    /// Called when the proxied session is disposed.
    fn detach(&self, session: &Session) {
        let _ = session;
    }

    /// Forwards a client message to the external backend. Always JSON text.
    fn send_message_to_backend(&self, session: &Session, message: &str);
}

// ============================================================================
// AgentHost
// ============================================================================

/// Owner of session attachments for a target.
///
/// Child sessions are owned by the host that attached them; the parent
/// session only keeps a non-owning routing entry. Precondition for
/// attaching: the client must not already have a session on this host.
pub trait AgentHost {
    /// Attaches a freshly constructed session to this host, taking
    /// ownership. Returns `false` if the attachment is rejected, in which
    /// case the session is discarded.
    fn attach(&self, session: Session) -> bool;
}

// ============================================================================
// CommandInterceptor
// ============================================================================

/// Pre-dispatch hook that may intercept commands by method name.
///
/// The interceptor decides the outcome of the command: resume the
/// continuation (synchronously or at any later time) to let normal dispatch
/// proceed, or drop it after answering the command through its own means.
pub trait CommandInterceptor: Send + Sync {
    /// Offers a command to the interceptor before normal dispatch.
    fn handle_command(&self, method: &str, message: &[u8], continuation: DispatchContinuation);
}

/// Continuation resuming normal dispatch of an intercepted command.
pub struct DispatchContinuation {
    session: Session,
    value: Value,
    raw: Vec<u8>,
}

impl DispatchContinuation {
    pub(crate) fn new(session: Session, value: Value, raw: Vec<u8>) -> Self {
        Self {
            session,
            value,
            raw,
        }
    }

    /// Resumes normal dispatch of the pending command.
    pub fn resume(self) {
        self.session.handle_command(self.value, self.raw);
    }

    /// The session the command arrived on, for interceptors that answer the
    /// command themselves.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}
