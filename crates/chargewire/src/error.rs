//! Unified error type for chargewire.

use chargewire_protocol::ProtocolError;
use chargewire_session::SessionError;
use chargewire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `chargewire` facade you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// conversions let `?` cross layer boundaries.
#[derive(Debug, thiserror::Error)]
pub enum ChargewireError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A framing error (encode, decode, malformed frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (handshake, call, close, configuration).
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let chargewire_err: ChargewireError = err.into();
        assert!(matches!(chargewire_err, ChargewireError::Transport(_)));
        assert!(chargewire_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = serde_json::from_str::<serde_json::Value>("[")
            .map_err(ProtocolError::Decode)
            .unwrap_err();
        let chargewire_err: ChargewireError = err.into();
        assert!(matches!(chargewire_err, ChargewireError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::Configuration("call_concurrency must be at least 1".into());
        let chargewire_err: ChargewireError = err.into();
        assert!(matches!(chargewire_err, ChargewireError::Session(_)));
        assert!(chargewire_err.to_string().contains("call_concurrency"));
    }
}
