//! RPC sessions for chargewire.
//!
//! This crate sits between the raw connection and the server:
//!
//! 1. **Handshake**: turning an upgrade request into a
//!    [`HandshakeContext`] and letting an [`Authenticator`] decide on it
//! 2. **Correlation**: matching `CALLRESULT`/`CALLERROR` frames to the
//!    calls that caused them, under a concurrency ceiling
//! 3. **Session**: the [`Session`] handle: outbound calls, inbound
//!    handlers, keepalive, and the closing handshake
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)  ← runs the handshake pipeline, keeps the registry
//!     ↕
//! Session Layer (this crate)  ← one Session per charge point
//!     ↕
//! Protocol Layer (below)  ← Frame, RpcError, JsonCodec
//!     ↕
//! Transport Layer  ← Connection (WebSocket or in-memory)
//! ```

mod auth;
mod config;
mod correlator;
mod error;
mod handshake;
mod inflight;
mod session;
mod validator;

pub use auth::{
    AcceptAll, Acceptance, Authenticator, DecisionReceiver, HandshakeDecision,
    HandshakeResponder,
};
pub use config::{CallIdStrategy, SessionConfig};
pub use error::SessionError;
pub use handshake::{
    HandshakeContext, PendingGuard, PendingHandshakes, negotiate_protocol,
    parse_basic_password,
};
pub use session::{
    CloseInfo, CloseOptions, InboundCall, Session, SessionDriver, SessionInit,
    SessionState,
};
pub use validator::{PayloadKind, PayloadValidator};

/// WebSocket close codes used by sessions.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Recorded when the peer's close frame carried no code. Never sent.
    pub const NO_STATUS: u16 = 1005;
    /// Recorded when the connection dropped without a closing handshake.
    /// Never sent.
    pub const ABNORMAL: u16 = 1006;
    /// Another connection took over this identity.
    pub const REPLACED: u16 = 4000;
}
