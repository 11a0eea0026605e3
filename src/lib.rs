//! DevTools protocol session multiplexer.
//!
//! This library implements the session layer that sits between one
//! debugging client and the backends it instruments: browser-side domain
//! handlers, a remote agent reachable over asynchronous channels, and
//! optionally a fully external proxy backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   JSON / binary    ┌───────────────────────────┐
//! │  Client  │◄──────────────────►│         Session           │
//! └──────────┘                    │  codec · dispatch · state │
//!                                 └─────┬──────────────┬──────┘
//!                                       │              │
//!                          domain handlers      agent channels
//!                          (browser-side)       (main + interrupt)
//! ```
//!
//! Key design points:
//!
//! - Messages are normalized to a canonical binary (CBOR) form for
//!   dispatch, whatever the client speaks on the wire
//! - Commands the local dispatcher does not take fall through to the
//!   agent, correlated by call id for out-of-order completion
//! - Suspension buffers outbound commands across a renderer swap; agent
//!   reattachment replays, requeues, or fails in-flight commands by policy
//! - Child sessions nest under a root and are addressed by a `sessionId`
//!   tag on the envelope
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use devtools_session::{Session, SessionClient};
//!
//! struct Frontend;
//!
//! impl SessionClient for Frontend {
//!     fn dispatch_protocol_message(&self, message: &[u8]) {
//!         println!("<- {}", String::from_utf8_lossy(message));
//!     }
//! }
//!
//! let session = Session::new(Arc::new(Frontend));
//! session.dispatch_protocol_message(br#"{"id":1,"method":"Runtime.evaluate"}"#);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | JSON <-> binary conversion and format sniffing |
//! | [`dispatcher`] | Domain handler registration and routing |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelope fields and method classification |
//! | [`session`] | Session orchestration |
//! | [`transport`] | Collaborator traits at the session boundary |
//!
//! # Error Handling Posture
//!
//! Nothing in this layer panics or aborts in non-test code. Failure paths
//! are silent no-ops (malformed commands, unreachable agents, unknown
//! child sessions), synthesized protocol error responses (unanswerable
//! in-flight commands after a navigation), or logged diagnostics with
//! degraded-but-continuing behavior (codec conversion failures).

// ============================================================================
// Modules
// ============================================================================

/// Message codec: JSON <-> binary conversion and format sniffing.
pub mod codec;

/// Domain handler registration and command dispatch.
pub mod dispatcher;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers for protocol entities.
pub mod identifiers;

/// Protocol envelope fields and method classification.
pub mod protocol;

/// Session orchestration: dispatch, suspension, reattachment, children.
pub mod session;

/// Collaborator traits at the session boundary.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Dispatch types
pub use dispatcher::{DomainHandler, MethodRegistry, Responder, UberDispatcher};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, SessionId};

// Session types
pub use session::{Session, SessionStateCookie, SessionStateUpdates};

// Transport contracts
pub use transport::{
    Agent, AgentChannel, AgentChannels, AgentHost, AttachRequest, CommandInterceptor,
    DispatchContinuation, ExternalAgentProxy, SessionClient,
};
