//! Error types for the session layer.

use std::time::Duration;

use chargewire_protocol::{ProtocolError, RpcError};

/// Everything that can go wrong between accepting an upgrade and closing
/// the session.
///
/// Per-call failures (`CallTimeout`, `CallError`) reach only the caller
/// that issued the call; they never close the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The upgrade was refused, either by the pipeline (bad request,
    /// unknown sub-protocol) or by the authenticator.
    #[error("handshake rejected ({status}): {message}")]
    HandshakeRejected { status: u16, message: String },

    /// The peer broke the framing rules badly enough to matter.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No answer arrived in time. The pending entry has been removed.
    #[error("call {method} ({id}) timed out after {timeout:?}")]
    CallTimeout {
        id: String,
        method: String,
        timeout: Duration,
    },

    /// The peer answered with a `CALLERROR`, or a payload failed
    /// validation.
    #[error("call failed: {0}")]
    CallError(#[from] RpcError),

    /// The session closed before the operation could complete.
    #[error("connection closed ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    pub(crate) fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            status,
            message: message.into(),
        }
    }
}
