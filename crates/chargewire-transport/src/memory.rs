//! In-process connection pair.
//!
//! Behaves like a WebSocket from the session layer's point of view: data
//! messages, ping/pong, and a closing handshake, but carried over tokio
//! channels. Used by the session tests and for embedding a charge point
//! simulator in the same process.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{CloseFrame, Connection, ConnectionId, Incoming, TransportError};

#[derive(Debug)]
enum Event {
    Message(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

/// One end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<mpsc::UnboundedReceiver<Event>>,
    auto_pong: AtomicBool,
}

impl MemoryConnection {
    /// Creates a connected pair. Whatever one end sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            id: ConnectionId::next(),
            tx: tx_b,
            rx: Mutex::new(rx_a),
            auto_pong: AtomicBool::new(true),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: tx_a,
            rx: Mutex::new(rx_b),
            auto_pong: AtomicBool::new(true),
        };
        (a, b)
    }

    /// Controls whether this end answers pings while receiving.
    ///
    /// Turning it off simulates an unresponsive peer.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::Relaxed);
    }

    fn push(&self, event: Event) -> Result<(), TransportError> {
        self.tx.send(event).map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.push(Event::Message(data.to_vec()))
    }

    async fn recv(&self) -> Result<Option<Incoming>, Self::Error> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Some(Event::Message(data)) => {
                    return Ok(Some(Incoming::Message(data)));
                }
                Some(Event::Pong(data)) => {
                    return Ok(Some(Incoming::Pong(data)));
                }
                Some(Event::Close(frame)) => {
                    return Ok(Some(Incoming::Close(frame)));
                }
                Some(Event::Ping(data)) => {
                    if self.auto_pong.load(Ordering::Relaxed) {
                        // a dropped peer will notice on its own
                        let _ = self.push(Event::Pong(data));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    async fn ping(&self, payload: &[u8]) -> Result<(), Self::Error> {
        self.push(Event::Ping(payload.to_vec()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), Self::Error> {
        self.push(Event::Close(Some(CloseFrame {
            code,
            reason: reason.to_owned(),
        })))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_messages_both_ways() {
        let (a, b) = MemoryConnection::pair();

        a.send(b"[2,\"1\",\"Heartbeat\",{}]").await.unwrap();
        b.send(b"[3,\"1\",{}]").await.unwrap();

        assert_eq!(
            b.recv().await.unwrap(),
            Some(Incoming::Message(b"[2,\"1\",\"Heartbeat\",{}]".to_vec()))
        );
        assert_eq!(
            a.recv().await.unwrap(),
            Some(Incoming::Message(b"[3,\"1\",{}]".to_vec()))
        );
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_ping_is_answered_while_peer_receives() {
        let (a, b) = MemoryConnection::pair();
        let peer = tokio::spawn(async move {
            // keeps receiving so the ping gets answered
            b.recv().await
        });

        a.ping(b"probe").await.unwrap();
        assert_eq!(
            a.recv().await.unwrap(),
            Some(Incoming::Pong(b"probe".to_vec()))
        );
        peer.abort();
    }

    #[tokio::test]
    async fn test_ping_unanswered_when_auto_pong_disabled() {
        let (a, b) = MemoryConnection::pair();
        b.set_auto_pong(false);

        a.ping(b"probe").await.unwrap();
        b.send(b"data").await.unwrap();

        let b_task = tokio::spawn(async move {
            let _ = b.recv().await;
            b
        });
        // the only thing `a` sees is the data message
        assert_eq!(
            a.recv().await.unwrap(),
            Some(Incoming::Message(b"data".to_vec()))
        );
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            a.recv(),
        )
        .await;
        assert!(result.is_err(), "no pong should arrive");
        b_task.abort();
    }

    #[tokio::test]
    async fn test_close_delivers_close_frame() {
        let (a, b) = MemoryConnection::pair();
        a.close(1000, "bye").await.unwrap();

        assert_eq!(
            b.recv().await.unwrap(),
            Some(Incoming::Close(Some(CloseFrame {
                code: 1000,
                reason: "bye".into(),
            })))
        );
    }

    #[tokio::test]
    async fn test_recv_after_peer_drop_returns_none() {
        let (a, b) = MemoryConnection::pair();
        drop(b);
        assert_eq!(a.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_returns_error() {
        let (a, b) = MemoryConnection::pair();
        drop(b);
        let result = a.send(b"x").await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    }
}
