//! Two-phase WebSocket upgrade.
//!
//! `tokio_tungstenite::accept_hdr_async` wants the accept/reject decision
//! synchronously, inside its header callback. Charge point authentication
//! is asynchronous (it may hit a database or another service), so the
//! upgrade is split in two:
//!
//! 1. [`IncomingConnection::read_request`] reads and parses the HTTP request
//!    head and validates the WebSocket headers.
//! 2. The caller decides, then calls [`IncomingConnection::accept`] (writes
//!    `101 Switching Protocols` and wraps the socket) or
//!    [`IncomingConnection::reject`] (writes an error status and hangs up).
//!
//! While the decision is pending, [`IncomingConnection::closed`] resolves if
//! the peer goes away.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::handshake::server::write_response as write_head;
use tokio_tungstenite::tungstenite::http::header::{
    CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT,
    SEC_WEBSOCKET_PROTOCOL, UPGRADE,
};
use tokio_tungstenite::tungstenite::http::{
    HeaderMap, HeaderName, HeaderValue, Response, StatusCode,
};
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::{ConnectionId, TransportError, WebSocketConnection};

/// Upper bound on the request head (request line plus headers).
pub const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Upper bound on the number of request headers.
const MAX_HEADERS: usize = 64;

/// A parsed HTTP upgrade request head.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target exactly as sent (path plus optional query).
    pub target: String,
    /// All request headers. Values may contain non-ASCII bytes.
    pub headers: HeaderMap,
}

impl UpgradeRequest {
    /// Parses a complete request head (everything up to and including the
    /// blank line).
    pub fn parse(head: &[u8]) -> Result<Self, TransportError> {
        Self::try_parse(head)?
            .map(|(_, request)| request)
            .ok_or_else(|| bad_request("incomplete request head"))
    }

    /// Parses the request head at the start of `buf`.
    ///
    /// Returns `None` while the head is still incomplete, otherwise the
    /// request and the number of bytes the head took up. CRLF and bare LF
    /// line endings are both accepted.
    fn try_parse(buf: &[u8]) -> Result<Option<(usize, Self)>, TransportError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut slots);
        let len = match raw.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => {
                return Err(bad_request(format!("malformed request head: {e}")));
            }
        };
        if raw.version != Some(1) {
            return Err(bad_request("unsupported HTTP version, expected HTTP/1.1"));
        }

        let mut headers = HeaderMap::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| bad_request(format!("bad header name: {e}")))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| bad_request(format!("bad header value: {e}")))?;
            headers.append(name, value);
        }

        let request = Self {
            method: raw.method.unwrap_or_default().to_owned(),
            target: raw.path.unwrap_or_default().to_owned(),
            headers,
        };
        Ok(Some((len, request)))
    }

    /// The path part of the target (before any `?`).
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// The raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Returns a header as text, if present and visible ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Checks the WebSocket upgrade headers and returns the client key.
    fn websocket_key(&self) -> Result<&[u8], TransportError> {
        if self.method != "GET" {
            return Err(bad_request(format!(
                "method {} cannot upgrade",
                self.method
            )));
        }
        if !self.has_token("connection", "upgrade") {
            return Err(bad_request("missing `Connection: upgrade`"));
        }
        if !self.has_token("upgrade", "websocket") {
            return Err(bad_request("missing `Upgrade: websocket`"));
        }
        if self.header_str("sec-websocket-version") != Some("13") {
            return Err(bad_request("unsupported Sec-WebSocket-Version"));
        }
        self.headers
            .get("sec-websocket-key")
            .map(HeaderValue::as_bytes)
            .ok_or_else(|| bad_request("missing Sec-WebSocket-Key"))
    }

    fn has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }
}

fn bad_request(msg: impl Into<String>) -> TransportError {
    TransportError::BadRequest(msg.into())
}

/// A TCP connection whose WebSocket upgrade has not been decided yet.
pub struct IncomingConnection {
    id: ConnectionId,
    stream: TcpStream,
    remote_addr: SocketAddr,
    /// Bytes that arrived after the request head.
    leftover: Vec<u8>,
    websocket_key: Option<Vec<u8>>,
}

impl IncomingConnection {
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id,
            stream,
            remote_addr,
            leftover: Vec::new(),
            websocket_key: None,
        }
    }

    /// The id the upgraded connection will carry.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Reads and validates the upgrade request head.
    ///
    /// On error the connection is still usable for
    /// [`reject`](Self::reject).
    pub async fn read_request(
        &mut self,
    ) -> Result<UpgradeRequest, TransportError> {
        let mut head = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            if let Some((len, request)) = UpgradeRequest::try_parse(&head)? {
                self.leftover = head.split_off(len);
                self.websocket_key = Some(request.websocket_key()?.to_vec());
                return Ok(request);
            }
            if head.len() > MAX_REQUEST_HEAD {
                return Err(TransportError::RequestTooLarge(MAX_REQUEST_HEAD));
            }

            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed(
                    "peer closed before completing the request".into(),
                ));
            }
            head.extend_from_slice(&chunk[..n]);
        }
    }

    /// Resolves when the peer closes or resets the socket.
    ///
    /// Never resolves if the peer sends data before the upgrade completes:
    /// that data is left in the socket for the WebSocket layer.
    pub async fn closed(&self) {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe).await {
            Ok(0) | Err(_) => {}
            Ok(_) => std::future::pending::<()>().await,
        }
    }

    /// Completes the upgrade, optionally confirming a sub-protocol.
    pub async fn accept(
        mut self,
        protocol: Option<&str>,
    ) -> Result<WebSocketConnection, TransportError> {
        let key = self.websocket_key.take().ok_or_else(|| {
            bad_request("upgrade accepted before the request was read")
        })?;

        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_ACCEPT, derive_accept_key(&key));
        if let Some(protocol) = protocol {
            response = response.header(SEC_WEBSOCKET_PROTOCOL, protocol);
        }
        let response = response
            .body(())
            .map_err(|e| bad_request(format!("unusable sub-protocol: {e}")))?;
        self.write_response(&response, &[]).await?;

        let ws = WebSocketStream::from_partially_read(
            self.stream,
            self.leftover,
            Role::Server,
            None,
        )
        .await;
        tracing::debug!(id = %self.id, ?protocol, "WebSocket upgrade complete");

        Ok(WebSocketConnection::new(self.id, self.remote_addr, ws))
    }

    /// Refuses the upgrade with the given HTTP status and plain-text body.
    pub async fn reject(
        mut self,
        status: u16,
        message: &str,
    ) -> Result<(), TransportError> {
        let status =
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
        let response = Response::builder()
            .status(status)
            .header(CONNECTION, "close")
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(CONTENT_LENGTH, message.len())
            .body(())
            .map_err(|e| bad_request(e.to_string()))?;

        self.write_response(&response, message.as_bytes()).await?;
        self.stream
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)?;

        tracing::debug!(id = %self.id, status = status.as_u16(), "upgrade rejected");
        Ok(())
    }

    async fn write_response(
        &mut self,
        response: &Response<()>,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let mut bytes = Vec::with_capacity(256 + body.len());
        write_head(&mut bytes, response)
            .map_err(|e| TransportError::SendFailed(io::Error::other(e)))?;
        bytes.extend_from_slice(body);
        self.stream
            .write_all(&bytes)
            .await
            .map_err(TransportError::SendFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /ocpp/EVSE-1?site=north HTTP/1.1\r\n\
        Host: localhost\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Upgrade: websocket\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Protocol: ocpp2.0.1, ocpp1.6\r\n\r\n";

    #[test]
    fn test_parse_upgrade_request_extracts_target_and_headers() {
        let req = UpgradeRequest::parse(UPGRADE).expect("should parse");

        assert_eq!(req.method, "GET");
        assert_eq!(req.path(), "/ocpp/EVSE-1");
        assert_eq!(req.query(), Some("site=north"));
        assert_eq!(
            req.header_str("sec-websocket-protocol"),
            Some("ocpp2.0.1, ocpp1.6")
        );
    }

    #[test]
    fn test_parse_without_query_returns_none() {
        let req = UpgradeRequest::parse(
            b"GET /EVSE-1 HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.path(), "/EVSE-1");
        assert!(req.query().is_none());
    }

    #[test]
    fn test_parse_keeps_non_ascii_header_bytes() {
        let mut head = b"GET /A HTTP/1.1\r\nX-Raw: caf".to_vec();
        head.push(0xE9);
        head.extend_from_slice(b"\r\n\r\n");

        let req = UpgradeRequest::parse(&head).expect("obs-text is allowed");
        let raw = req.headers.get("x-raw").unwrap().as_bytes();
        assert_eq!(raw, &[b'c', b'a', b'f', 0xE9]);
        assert!(req.header_str("x-raw").is_none());
    }

    #[test]
    fn test_parse_malformed_request_line_returns_error() {
        let result = UpgradeRequest::parse(b"GET\r\n\r\n");
        assert!(matches!(result, Err(TransportError::BadRequest(_))));
    }

    #[test]
    fn test_parse_http10_returns_error() {
        let result = UpgradeRequest::parse(b"GET / HTTP/1.0\r\n\r\n");
        assert!(matches!(result, Err(TransportError::BadRequest(_))));
    }

    #[test]
    fn test_websocket_key_valid_upgrade_returns_key() {
        let req = UpgradeRequest::parse(UPGRADE).unwrap();
        assert_eq!(
            req.websocket_key().unwrap(),
            b"dGhlIHNhbXBsZSBub25jZQ=="
        );
    }

    #[test]
    fn test_websocket_key_plain_http_returns_error() {
        let req = UpgradeRequest::parse(
            b"GET /EVSE-1 HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .unwrap();
        assert!(matches!(
            req.websocket_key(),
            Err(TransportError::BadRequest(_))
        ));
    }

    #[test]
    fn test_websocket_key_post_returns_error() {
        let head = String::from_utf8_lossy(UPGRADE).replacen("GET", "POST", 1);
        let req = UpgradeRequest::parse(head.as_bytes()).unwrap();
        assert!(req.websocket_key().is_err());
    }

    #[test]
    fn test_try_parse_reports_head_length() {
        let (len, req) = UpgradeRequest::try_parse(b"GET / HTTP/1.1\r\n\r\nextra")
            .unwrap()
            .expect("head is complete");
        assert_eq!(len, 18);
        assert_eq!(req.target, "/");
    }

    #[test]
    fn test_try_parse_incomplete_head_returns_none() {
        let result = UpgradeRequest::try_parse(b"GET / HTTP/1.1\r\nHost: x\r\n");
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_try_parse_accepts_bare_lf_line_endings() {
        let (len, req) = UpgradeRequest::try_parse(b"GET /A HTTP/1.1\nHost: x\n\nrest")
            .unwrap()
            .expect("LF-only head is complete");
        assert_eq!(len, 25);
        assert_eq!(req.path(), "/A");
        assert_eq!(req.header_str("host"), Some("x"));
    }

    #[test]
    fn test_try_parse_too_many_headers_returns_error() {
        let mut head = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            head.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        assert!(matches!(
            UpgradeRequest::try_parse(&head),
            Err(TransportError::BadRequest(_))
        ));
    }
}
