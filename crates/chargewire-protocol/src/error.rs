//! Error types for the protocol layer.
//!
//! Two kinds of error live here. [`RpcError`] is an error a *peer* reports
//! inside a `CALLERROR` frame (or one we report back). [`ProtocolError`] is
//! a local failure to encode or decode a frame.

use std::fmt;

use serde::de::IntoDeserializer;
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::MessageType;

/// The closed set of OCPP-J error codes.
///
/// Both spellings of the occurrence constraint code are kept: OCPP 1.6
/// shipped with the misspelled `OccurenceConstraintViolation` and 2.0.1
/// fixed it, so a server speaking both versions sees both.
///
/// Serializes as the bare variant name. Codes this list does not know
/// deserialize as [`GenericError`](RpcErrorCode::GenericError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    FormatViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    MessageTypeNotSupported,
    RpcFrameworkError,
    #[serde(other)]
    GenericError,
}

impl RpcErrorCode {
    /// Parses a wire code. Unknown codes become [`GenericError`].
    ///
    /// [`GenericError`]: RpcErrorCode::GenericError
    pub fn from_code(code: &str) -> Self {
        let de: StrDeserializer<'_, ValueError> = code.into_deserializer();
        Self::deserialize(de).unwrap_or(Self::GenericError)
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // variant names are the wire names
        fmt::Debug::fmt(self, f)
    }
}

/// An error carried by a `CALLERROR` frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {description}")]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub description: String,
    /// Free-form JSON; `{}` when there is nothing to add.
    pub details: Value,
}

impl RpcError {
    /// Creates an error with empty details.
    pub fn new(code: RpcErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    /// Replaces the details payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            RpcErrorCode::NotImplemented,
            format!("method `{method}` is not implemented"),
        )
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, description)
    }
}

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a frame into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes are not JSON at all.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The JSON does not form a valid frame.
    ///
    /// `message_id` is set when the frame carried a readable id, so the
    /// receiver can still answer with a `CALLERROR`.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        message_id: Option<String>,
        message_type: Option<MessageType>,
        code: RpcErrorCode,
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid(
        message_id: Option<&str>,
        message_type: Option<MessageType>,
        code: RpcErrorCode,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidFrame {
            message_id: message_id.map(str::to_owned),
            message_type,
            code,
            reason: reason.into(),
        }
    }

    /// The id of the offending frame, when one could be read.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::InvalidFrame { message_id, .. } => message_id.as_deref(),
            _ => None,
        }
    }

    /// The id to answer with a `CALLERROR`, if the failure deserves one.
    ///
    /// Broken results and errors are never answered; a frame of unknown
    /// type with a readable id is.
    pub fn reply_id(&self) -> Option<&str> {
        match self {
            Self::InvalidFrame {
                message_id: Some(id),
                message_type: None | Some(MessageType::Call),
                ..
            } => Some(id),
            _ => None,
        }
    }

    /// The code to report back to the peer for this failure.
    pub fn rpc_code(&self) -> RpcErrorCode {
        match self {
            Self::Encode(_) => RpcErrorCode::InternalError,
            Self::Decode(_) => RpcErrorCode::RpcFrameworkError,
            Self::InvalidFrame { code, .. } => *code,
        }
    }

    /// Converts the failure into the error a `CALLERROR` reply carries.
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::new(self.rpc_code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_use_wire_names() {
        for (code, wire) in [
            (RpcErrorCode::GenericError, "GenericError"),
            (RpcErrorCode::NotImplemented, "NotImplemented"),
            (RpcErrorCode::RpcFrameworkError, "RpcFrameworkError"),
            (
                RpcErrorCode::OccurenceConstraintViolation,
                "OccurenceConstraintViolation",
            ),
        ] {
            assert_eq!(RpcErrorCode::from_code(wire), code);
            assert_eq!(code.to_string(), wire);
            assert_eq!(serde_json::to_value(code).unwrap(), Value::from(wire));
        }
    }

    #[test]
    fn test_deserialize_unknown_code_is_generic_error() {
        let code: RpcErrorCode =
            serde_json::from_value(Value::from("VendorSpecific")).unwrap();
        assert_eq!(code, RpcErrorCode::GenericError);
    }

    #[test]
    fn test_from_code_unknown_returns_generic_error() {
        assert_eq!(
            RpcErrorCode::from_code("SomethingNew"),
            RpcErrorCode::GenericError
        );
    }

    #[test]
    fn test_both_occurrence_spellings_are_distinct() {
        assert_ne!(
            RpcErrorCode::from_code("OccurenceConstraintViolation"),
            RpcErrorCode::from_code("OccurrenceConstraintViolation"),
        );
    }

    #[test]
    fn test_rpc_error_new_has_empty_object_details() {
        let err = RpcError::new(RpcErrorCode::SecurityError, "nope");
        assert_eq!(err.details, serde_json::json!({}));
        assert_eq!(err.to_string(), "SecurityError: nope");
    }

    #[test]
    fn test_decode_error_maps_to_framework_error() {
        let json_err = serde_json::from_str::<Value>("[").unwrap_err();
        let err = ProtocolError::Decode(json_err);
        assert_eq!(err.rpc_code(), RpcErrorCode::RpcFrameworkError);
        assert!(err.message_id().is_none());
    }
}
