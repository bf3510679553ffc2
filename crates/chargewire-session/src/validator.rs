//! Payload validation hook for strict mode.
//!
//! chargewire does not ship OCPP schemas. When
//! [`SessionConfig::strict_mode`](crate::SessionConfig::strict_mode) is on,
//! the session hands every payload to a [`PayloadValidator`] keyed by the
//! negotiated sub-protocol, so an embedder can plug in whatever schema
//! checking it has.

use chargewire_protocol::RpcError;
use serde_json::Value;

/// Which half of a call a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// The `params` of a `CALL`.
    Request,
    /// The `result` of a `CALLRESULT`.
    Response,
}

/// Checks payloads against the schema of a sub-protocol.
///
/// Called for outbound call params, inbound call params, inbound results
/// and handler results. Returning an error makes the session answer with
/// that error (inbound) or fail the call locally (outbound).
pub trait PayloadValidator: Send + Sync + 'static {
    fn validate(
        &self,
        protocol: &str,
        method: &str,
        kind: PayloadKind,
        payload: &Value,
    ) -> Result<(), RpcError>;
}
