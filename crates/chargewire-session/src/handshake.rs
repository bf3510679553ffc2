//! Handshake context: everything the authenticator gets to look at.
//!
//! A charge point connects to `ws://host/<endpoint>/<identity>`, offers one
//! or more OCPP sub-protocols and, under security profile 1, sends its
//! password as HTTP Basic credentials with the identity as user name.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chargewire_transport::http::HeaderMap;
use chargewire_transport::{ConnectionId, UpgradeRequest};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio_util::sync::CancellationToken;

use crate::SessionError;

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
/// URL-safe alphabet, padding optional.
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// What a pending upgrade looks like to the authenticator.
///
/// Built once per upgrade request and never changed afterwards. A live
/// session keeps it for reference.
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    /// Percent-decoded last path segment.
    pub identity: String,
    /// The path before the identity, `/` when there is none.
    pub endpoint: String,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    pub remote_addr: SocketAddr,
    pub headers: HeaderMap,
    /// Sub-protocols the client offered.
    pub protocols: BTreeSet<String>,
    /// The Basic-auth password, when the header was well formed and named
    /// this identity. May contain any bytes, including `:`.
    pub password: Option<Vec<u8>>,
    pub connection_id: ConnectionId,
}

impl HandshakeContext {
    /// Builds the context from a parsed upgrade request.
    ///
    /// # Errors
    /// `HandshakeRejected` with status 400 when the identity is empty or
    /// not valid UTF-8 after decoding.
    pub fn from_request(
        request: &UpgradeRequest,
        remote_addr: SocketAddr,
        connection_id: ConnectionId,
    ) -> Result<Self, SessionError> {
        let (endpoint, identity) = split_identity(request.path())?;

        let protocols = request
            .headers
            .get_all("sec-websocket-protocol")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();

        let password = request
            .headers
            .get("authorization")
            .and_then(|v| parse_basic_password(v.as_bytes(), &identity));

        Ok(Self {
            identity,
            endpoint,
            query: request.query().map(str::to_owned),
            remote_addr,
            headers: request.headers.clone(),
            protocols,
            password,
            connection_id,
        })
    }
}

/// Splits `/a/b/EVSE%201` into (`/a/b`, `EVSE 1`).
fn split_identity(path: &str) -> Result<(String, String), SessionError> {
    let (endpoint, raw) = path.rsplit_once('/').unwrap_or(("", path));

    if has_malformed_escape(raw) {
        return Err(SessionError::rejected(
            400,
            "malformed percent-escape in identity",
        ));
    }
    let identity = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| SessionError::rejected(400, "identity is not valid UTF-8"))?;
    if identity.is_empty() {
        return Err(SessionError::rejected(400, "missing identity"));
    }

    let endpoint = if endpoint.is_empty() { "/" } else { endpoint };
    Ok((endpoint.to_owned(), identity.into_owned()))
}

/// A `%` not followed by two hex digits.
fn has_malformed_escape(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'%'
            && !matches!(
                bytes.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    })
}

/// Extracts the password from a Basic `Authorization` header.
///
/// The decoded credentials must start with `<identity>:`; everything after
/// that prefix is the password, byte for byte. Padding is optional and the
/// URL-safe alphabet is accepted too. Anything unexpected yields `None`
/// rather than an error.
pub fn parse_basic_password(header: &[u8], identity: &str) -> Option<Vec<u8>> {
    let header = header.trim_ascii();
    let space = header.iter().position(|b| *b == b' ')?;
    let (scheme, encoded) = header.split_at(space);
    if !scheme.eq_ignore_ascii_case(b"basic") {
        return None;
    }

    let encoded = encoded.trim_ascii();
    let decoded = BASE64
        .decode(encoded)
        .or_else(|_| BASE64_URL.decode(encoded))
        .ok()?;
    let rest = decoded.strip_prefix(identity.as_bytes())?;
    rest.strip_prefix(b":").map(<[u8]>::to_vec)
}

/// Picks the sub-protocol to confirm.
///
/// An explicit choice must be one the client offered. Without one, the
/// first server-preferred protocol the client offered wins; no overlap
/// means no sub-protocol at all.
pub fn negotiate_protocol(
    server: &[String],
    offered: &BTreeSet<String>,
    chosen: Option<&str>,
) -> Result<Option<String>, SessionError> {
    match chosen {
        Some(protocol) if offered.contains(protocol) => {
            Ok(Some(protocol.to_owned()))
        }
        Some(protocol) => Err(SessionError::rejected(
            400,
            format!("client did not offer sub-protocol {protocol}"),
        )),
        None => Ok(server.iter().find(|p| offered.contains(*p)).cloned()),
    }
}

#[derive(Debug)]
struct PendingEntry {
    identity: String,
    cancel: CancellationToken,
    started: Instant,
}

/// Upgrades currently waiting for an authentication decision.
///
/// Entries are added by [`insert`](Self::insert) and removed when the
/// returned guard drops, however the upgrade ends.
#[derive(Debug, Clone, Default)]
pub struct PendingHandshakes {
    entries: Arc<Mutex<HashMap<ConnectionId, PendingEntry>>>,
}

impl PendingHandshakes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an upgrade and returns a guard that unregisters it.
    pub fn insert(
        &self,
        connection_id: ConnectionId,
        identity: &str,
        cancel: CancellationToken,
    ) -> PendingGuard {
        self.entries.lock().insert(
            connection_id,
            PendingEntry {
                identity: identity.to_owned(),
                cancel,
                started: Instant::now(),
            },
        );
        PendingGuard {
            connection_id,
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every pending upgrade.
    pub fn cancel_all(&self) {
        let entries = self.entries.lock();
        for (id, entry) in entries.iter() {
            tracing::debug!(
                conn_id = %id,
                identity = %entry.identity,
                waited = ?entry.started.elapsed(),
                "cancelling pending handshake"
            );
            entry.cancel.cancel();
        }
    }
}

/// Removes its entry from [`PendingHandshakes`] on drop.
#[derive(Debug)]
pub struct PendingGuard {
    connection_id: ConnectionId,
    entries: Arc<Mutex<HashMap<ConnectionId, PendingEntry>>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.entries.lock().remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    fn request(head: &str) -> UpgradeRequest {
        UpgradeRequest::parse(head.as_bytes()).unwrap()
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_from_request_extracts_identity_endpoint_and_protocols() {
        let req = request(
            "GET /ocpp/cs/EVSE%2D1?site=7 HTTP/1.1\r\n\
             Sec-WebSocket-Protocol: ocpp2.0.1, ocpp1.6\r\n\r\n",
        );
        let ctx =
            HandshakeContext::from_request(&req, addr(), ConnectionId::new(1))
                .unwrap();

        assert_eq!(ctx.identity, "EVSE-1");
        assert_eq!(ctx.endpoint, "/ocpp/cs");
        assert_eq!(ctx.query.as_deref(), Some("site=7"));
        assert!(ctx.protocols.contains("ocpp1.6"));
        assert!(ctx.protocols.contains("ocpp2.0.1"));
        assert!(ctx.password.is_none());
    }

    #[test]
    fn test_from_request_root_identity_has_slash_endpoint() {
        let req = request("GET /EVSE-1 HTTP/1.1\r\n\r\n");
        let ctx =
            HandshakeContext::from_request(&req, addr(), ConnectionId::new(1))
                .unwrap();
        assert_eq!(ctx.endpoint, "/");
        assert_eq!(ctx.identity, "EVSE-1");
    }

    #[test]
    fn test_from_request_empty_identity_rejected_with_400() {
        let req = request("GET /ocpp/ HTTP/1.1\r\n\r\n");
        let err =
            HandshakeContext::from_request(&req, addr(), ConnectionId::new(1))
                .unwrap_err();
        assert!(matches!(
            err,
            SessionError::HandshakeRejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_from_request_reads_basic_password() {
        // "ABC:secret"
        let req = request(
            "GET /ABC HTTP/1.1\r\nAuthorization: Basic QUJDOnNlY3JldA==\r\n\r\n",
        );
        let ctx =
            HandshakeContext::from_request(&req, addr(), ConnectionId::new(1))
                .unwrap();
        assert_eq!(ctx.password.as_deref(), Some(&b"secret"[..]));
    }

    #[test]
    fn test_parse_basic_password_keeps_colons() {
        let header = format!("Basic {}", STANDARD.encode("ABC:p:a:ss"));
        assert_eq!(
            parse_basic_password(header.as_bytes(), "ABC"),
            Some(b"p:a:ss".to_vec())
        );
    }

    #[test]
    fn test_parse_basic_password_keeps_binary_bytes() {
        let mut raw = b"ABC:".to_vec();
        raw.extend_from_slice(&[0x00, 0xFF, b':', 0x80]);
        let header = format!("basic {}", STANDARD.encode(&raw));
        assert_eq!(
            parse_basic_password(header.as_bytes(), "ABC"),
            Some(vec![0x00, 0xFF, b':', 0x80])
        );
    }

    #[test]
    fn test_parse_basic_password_wrong_identity_returns_none() {
        let header = format!("Basic {}", STANDARD.encode("XYZ:secret"));
        assert_eq!(parse_basic_password(header.as_bytes(), "ABC"), None);
    }

    #[test]
    fn test_parse_basic_password_malformed_returns_none() {
        assert_eq!(parse_basic_password(b"Basic !!!not-base64", "ABC"), None);
        assert_eq!(parse_basic_password(b"Bearer QUJDOng=", "ABC"), None);
        assert_eq!(parse_basic_password(b"Basic", "ABC"), None);
        // identity without the colon separator
        let header = format!("Basic {}", STANDARD.encode("ABC"));
        assert_eq!(parse_basic_password(header.as_bytes(), "ABC"), None);
    }

    #[test]
    fn test_parse_basic_password_accepts_missing_padding() {
        // "ABC:p" is "QUJDOnA=" when padded
        assert_eq!(
            parse_basic_password(b"Basic QUJDOnA", "ABC"),
            Some(b"p".to_vec())
        );
        assert_eq!(
            parse_basic_password(b"Basic QUJDOnA=", "ABC"),
            Some(b"p".to_vec())
        );
    }

    #[test]
    fn test_parse_basic_password_accepts_url_safe_alphabet() {
        let raw = [b'A', b'B', b'C', b':', 0xFB, 0xFF];
        let header = format!("Basic {}", URL_SAFE_NO_PAD.encode(raw));
        assert!(header.contains('-') || header.contains('_'));
        assert_eq!(
            parse_basic_password(header.as_bytes(), "ABC"),
            Some(vec![0xFB, 0xFF])
        );
    }

    #[test]
    fn test_from_request_malformed_escape_rejected_with_400() {
        for path in ["/ocpp/EVSE%ZZ", "/ocpp/EVSE%2", "/ocpp/%"] {
            let req = request(&format!("GET {path} HTTP/1.1\r\n\r\n"));
            let err =
                HandshakeContext::from_request(&req, addr(), ConnectionId::new(1))
                    .unwrap_err();
            assert!(
                matches!(err, SessionError::HandshakeRejected { status: 400, .. }),
                "{path} should be rejected"
            );
        }
    }

    fn offered(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_negotiate_protocol_uses_server_preference() {
        let server = vec!["ocpp2.0.1".to_string(), "ocpp1.6".to_string()];
        let chosen = negotiate_protocol(
            &server,
            &offered(&["ocpp1.6", "ocpp2.0.1"]),
            None,
        )
        .unwrap();
        assert_eq!(chosen.as_deref(), Some("ocpp2.0.1"));
    }

    #[test]
    fn test_negotiate_protocol_no_overlap_returns_none() {
        let server = vec!["ocpp2.0.1".to_string()];
        let chosen =
            negotiate_protocol(&server, &offered(&["ocpp1.6"]), None).unwrap();
        assert!(chosen.is_none());
    }

    #[test]
    fn test_negotiate_protocol_explicit_unoffered_is_400() {
        let err = negotiate_protocol(&[], &offered(&["ocpp1.6"]), Some("ocpp2.0.1"))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::HandshakeRejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_pending_handshakes_guard_removes_entry() {
        let pending = PendingHandshakes::new();
        let token = CancellationToken::new();
        let guard = pending.insert(ConnectionId::new(5), "EVSE-1", token.clone());
        assert_eq!(pending.len(), 1);

        pending.cancel_all();
        assert!(token.is_cancelled());

        drop(guard);
        assert!(pending.is_empty());
    }
}
