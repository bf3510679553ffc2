//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" converts between Rust types and raw bytes. The session layer
//! doesn't care how frames are serialized; it just needs something that
//! implements [`Codec`]. OCPP-J is JSON, so [`JsonCodec`] is the one in use.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Frame, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the codec is shared by every task of a
/// session.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Encodes a frame.
    fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        self.encode(frame)
    }

    /// Decodes a frame, distinguishing "not JSON" from "not a frame".
    fn decode_frame(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        let value: Value = self.decode(data)?;
        Frame::from_value(value)
    }
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use chargewire_protocol::{Codec, Frame, JsonCodec, json};
///
/// let codec = JsonCodec;
/// let frame = Frame::call("1", "Heartbeat", json!({}));
///
/// let bytes = codec.encode_frame(&frame).unwrap();
/// assert_eq!(bytes, br#"[2,"1","Heartbeat",{}]"#);
///
/// let decoded = codec.decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcErrorCode;

    #[test]
    fn test_decode_frame_garbage_is_decode_error() {
        let err = JsonCodec.decode_frame(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert_eq!(err.rpc_code(), RpcErrorCode::RpcFrameworkError);
    }

    #[test]
    fn test_decode_frame_call_result() {
        let frame = JsonCodec
            .decode_frame(br#"[3,"9",{"currentTime":"2026-01-01T00:00:00Z"}]"#)
            .unwrap();
        assert_eq!(frame.id(), "9");
        assert!(matches!(frame, Frame::CallResult { .. }));
    }

    #[test]
    fn test_encode_frame_call_result() {
        let bytes = JsonCodec
            .encode_frame(&Frame::result("9", serde_json::json!({})))
            .unwrap();
        assert_eq!(bytes, br#"[3,"9",{}]"#);
    }
}
