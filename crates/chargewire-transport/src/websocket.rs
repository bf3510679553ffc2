//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{
    CloseFrame, Connection, ConnectionId, Incoming, IncomingConnection,
    TransportError,
};

pub(crate) type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Listens for inbound TCP connections that are expected to request a
/// WebSocket upgrade.
///
/// `accept` does not perform the upgrade: it hands back an
/// [`IncomingConnection`] whose request can be inspected and then accepted
/// or rejected at leisure, on its own task.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next inbound TCP connection.
    pub async fn accept(&self) -> Result<IncomingConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let id = ConnectionId::next();
        tracing::debug!(%id, %addr, "accepted TCP connection");

        Ok(IncomingConnection::new(id, stream, addr))
    }
}

/// A single upgraded WebSocket connection.
///
/// The stream is split so one task can block in [`recv`](Connection::recv)
/// while others send.
pub struct WebSocketConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        ws: WsStream,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            remote_addr,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// The peer's socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        // OCPP-J travels in text frames.
        let text = std::str::from_utf8(data).map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            ))
        })?;
        self.send_message(Message::Text(text.to_owned().into()))
            .await
    }

    async fn recv(&self) -> Result<Option<Incoming>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Incoming::Message(
                        text.as_bytes().to_vec(),
                    )));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Incoming::Message(data.into())));
                }
                Some(Ok(Message::Pong(data))) => {
                    return Ok(Some(Incoming::Pong(data.into())));
                }
                Some(Ok(Message::Close(frame))) => {
                    let frame = frame.map(|f| CloseFrame {
                        code: u16::from(f.code),
                        reason: f.reason.as_str().to_owned(),
                    });
                    return Ok(Some(Incoming::Close(frame)));
                }
                // tungstenite answers pings on its own
                Some(Ok(_)) => continue,
                Some(Err(
                    WsError::ConnectionClosed | WsError::AlreadyClosed,
                ))
                | None => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn ping(&self, payload: &[u8]) -> Result<(), Self::Error> {
        self.send_message(Message::Ping(payload.to_vec().into()))
            .await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), Self::Error> {
        let frame = WsCloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.send_message(Message::Close(Some(frame))).await
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
