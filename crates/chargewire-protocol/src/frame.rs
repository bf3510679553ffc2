//! OCPP-J frames.
//!
//! Every message on the wire is a JSON array whose first element is the
//! message type:
//!
//! ```text
//! [2, "<id>", "<method>", {params}]                        CALL
//! [3, "<id>", {result}]                                    CALLRESULT
//! [4, "<id>", "<code>", "<description>", {details}]        CALLERROR
//! ```
//!
//! The id is chosen by whoever sends the `CALL`; the answer echoes it.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{ProtocolError, RpcError, RpcErrorCode};

/// The first element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }
}

/// A single RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A request. The receiver must answer with a result or an error
    /// carrying the same id.
    Call {
        id: String,
        method: String,
        params: Value,
    },
    /// A successful answer to a `Call`.
    CallResult { id: String, result: Value },
    /// A failed answer to a `Call`.
    CallError {
        id: String,
        code: RpcErrorCode,
        description: String,
        details: Value,
    },
}

impl Frame {
    pub fn call(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Value,
    ) -> Self {
        Self::Call {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn result(id: impl Into<String>, result: Value) -> Self {
        Self::CallResult {
            id: id.into(),
            result,
        }
    }

    /// Builds a `CallError` answering `id` from an [`RpcError`].
    pub fn error(id: impl Into<String>, error: RpcError) -> Self {
        Self::CallError {
            id: id.into(),
            code: error.code,
            description: error.description,
            details: error.details,
        }
    }

    /// The correlation id.
    pub fn id(&self) -> &str {
        match self {
            Self::Call { id, .. }
            | Self::CallResult { id, .. }
            | Self::CallError { id, .. } => id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Call { .. } => MessageType::Call,
            Self::CallResult { .. } => MessageType::CallResult,
            Self::CallError { .. } => MessageType::CallError,
        }
    }

    /// Validates the shape of a decoded JSON value and builds a frame.
    ///
    /// Failures report the id whenever it could be read, so that a bad
    /// `CALL` can still be answered.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Array(items) = value else {
            return Err(ProtocolError::invalid(
                None,
                None,
                RpcErrorCode::RpcFrameworkError,
                "message must be a JSON array",
            ));
        };

        let id = match items.get(1) {
            Some(Value::String(id)) => id.clone(),
            _ => {
                return Err(ProtocolError::invalid(
                    None,
                    None,
                    RpcErrorCode::RpcFrameworkError,
                    "message id must be a string",
                ));
            }
        };

        let message_type = items
            .first()
            .and_then(Value::as_u64)
            .and_then(MessageType::from_u64)
            .ok_or_else(|| {
                ProtocolError::invalid(
                    Some(&id),
                    None,
                    RpcErrorCode::MessageTypeNotSupported,
                    format!("unsupported message type {:?}", items.first()),
                )
            })?;

        let expected_len = match message_type {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        };
        if items.len() != expected_len {
            return Err(ProtocolError::invalid(
                Some(&id),
                Some(message_type),
                RpcErrorCode::FormationViolation,
                format!(
                    "{message_type:?} must have {expected_len} elements, got {}",
                    items.len()
                ),
            ));
        }

        let mut rest = items.into_iter().skip(2);
        let mut next = || rest.next().unwrap_or(Value::Null);

        match message_type {
            MessageType::Call => {
                let Value::String(method) = next() else {
                    return Err(ProtocolError::invalid(
                        Some(&id),
                        Some(MessageType::Call),
                        RpcErrorCode::FormationViolation,
                        "method must be a string",
                    ));
                };
                Ok(Self::Call {
                    id,
                    method,
                    params: next(),
                })
            }
            MessageType::CallResult => Ok(Self::CallResult {
                id,
                result: next(),
            }),
            MessageType::CallError => {
                let code = match next() {
                    Value::String(code) => RpcErrorCode::from_code(&code),
                    _ => {
                        return Err(ProtocolError::invalid(
                            Some(&id),
                            Some(MessageType::CallError),
                            RpcErrorCode::FormationViolation,
                            "error code must be a string",
                        ));
                    }
                };
                let Value::String(description) = next() else {
                    return Err(ProtocolError::invalid(
                        Some(&id),
                        Some(MessageType::CallError),
                        RpcErrorCode::FormationViolation,
                        "error description must be a string",
                    ));
                };
                Ok(Self::CallError {
                    id,
                    code,
                    description,
                    details: next(),
                })
            }
        }
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Call { id, method, params } => {
                let mut seq = s.serialize_seq(Some(4))?;
                seq.serialize_element(&(MessageType::Call as u8))?;
                seq.serialize_element(id)?;
                seq.serialize_element(method)?;
                seq.serialize_element(params)?;
                seq.end()
            }
            Self::CallResult { id, result } => {
                let mut seq = s.serialize_seq(Some(3))?;
                seq.serialize_element(&(MessageType::CallResult as u8))?;
                seq.serialize_element(id)?;
                seq.serialize_element(result)?;
                seq.end()
            }
            Self::CallError {
                id,
                code,
                description,
                details,
            } => {
                let mut seq = s.serialize_seq(Some(5))?;
                seq.serialize_element(&(MessageType::CallError as u8))?;
                seq.serialize_element(id)?;
                seq.serialize_element(code)?;
                seq.serialize_element(description)?;
                seq.serialize_element(details)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        Frame::from_value(value).map_err(serde::de::Error::custom)
    }
}
