//! Transport abstraction layer for chargewire.
//!
//! Provides the [`Connection`] trait that the session layer drives, a
//! WebSocket listener whose upgrade can be decided asynchronously, and an
//! in-memory connection pair for tests and embedding.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod upgrade;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::MemoryConnection;
#[cfg(feature = "websocket")]
pub use upgrade::{IncomingConnection, UpgradeRequest};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

/// HTTP types used by the upgrade request (re-exported from `tungstenite`).
#[cfg(feature = "websocket")]
pub use tokio_tungstenite::tungstenite::http;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The close frame a peer sent (or that we send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket close code (1000 = normal closure).
    pub code: u16,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

/// Something received from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A data message (text or binary), as raw bytes.
    Message(Vec<u8>),
    /// A reply to one of our pings.
    Pong(Vec<u8>),
    /// The peer started the closing handshake.
    Close(Option<CloseFrame>),
}

/// A single message-oriented, full-duplex connection.
///
/// `send` and `recv` may be awaited concurrently from different tasks.
/// Methods return `Send` futures so that generic drivers can spawn them.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one data message to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next event from the remote peer.
    ///
    /// Returns `Ok(None)` when the underlying stream ended without a
    /// closing handshake.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Incoming>, Self::Error>> + Send;

    /// Sends a liveness probe. The peer answers with [`Incoming::Pong`].
    fn ping(
        &self,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Starts (or answers) the closing handshake.
    fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
