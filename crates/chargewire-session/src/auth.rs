//! Authentication hook for deciding whether a charge point may connect.
//!
//! chargewire doesn't implement authentication itself. That's your job:
//! check the password against a database, consult an allow-list, call
//! another service. The framework defines the [`Authenticator`] trait and
//! calls it for every upgrade request, *before* the WebSocket handshake is
//! answered.
//!
//! The authenticator does not return its decision. It gets a
//! [`HandshakeResponder`] and calls [`accept`](HandshakeResponder::accept)
//! or [`reject`](HandshakeResponder::reject) on it, possibly from another
//! task. Only the first decision counts.

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::HandshakeContext;

/// Decides whether an upgrade request becomes a session.
///
/// # Trait bounds
///
/// - `Send + Sync` → the authenticator is shared by every connection task.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use chargewire_session::{
///     Acceptance, Authenticator, HandshakeContext, HandshakeResponder,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// /// Accepts charge points whose password is their identity reversed.
/// struct ReversedPassword;
///
/// impl Authenticator for ReversedPassword {
///     async fn authenticate(
///         &self,
///         responder: HandshakeResponder,
///         handshake: Arc<HandshakeContext>,
///         _cancel: CancellationToken,
///     ) {
///         let expected: Vec<u8> = handshake.identity.bytes().rev().collect();
///         if handshake.password.as_deref() == Some(expected.as_slice()) {
///             responder.accept(Acceptance::default());
///         } else {
///             responder.reject(401, "bad credentials");
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Inspects the handshake and decides through `responder`.
    ///
    /// `cancel` fires when the upgrade is abandoned (peer hung up, timeout,
    /// server shutdown). Any decision made after that is ignored.
    ///
    /// Returning without deciding is allowed as long as a clone of the
    /// responder lives on somewhere. If every clone is dropped undecided,
    /// the upgrade is rejected with 500.
    fn authenticate(
        &self,
        responder: HandshakeResponder,
        handshake: Arc<HandshakeContext>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send;
}

/// Accepts every upgrade. The default when no authenticator is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    async fn authenticate(
        &self,
        responder: HandshakeResponder,
        _handshake: Arc<HandshakeContext>,
        _cancel: CancellationToken,
    ) {
        responder.accept(Acceptance::default());
    }
}

/// What an accepting authenticator can attach to the new session.
#[derive(Debug, Clone, Default)]
pub struct Acceptance {
    /// Explicit sub-protocol; must be one the client offered.
    pub protocol: Option<String>,
    /// Arbitrary data made available as
    /// [`Session::data`](crate::Session::data).
    pub session: Map<String, Value>,
}

impl Acceptance {
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_session(mut self, session: Map<String, Value>) -> Self {
        self.session = session;
        self
    }
}

/// The outcome of authentication.
#[derive(Debug, Clone)]
pub enum HandshakeDecision {
    Accept(Acceptance),
    Reject { status: u16, message: String },
}

type Slot = Mutex<Option<oneshot::Sender<HandshakeDecision>>>;

/// Hands the authentication decision back to the pipeline.
///
/// Cloneable so the decision can be made from another task. The first
/// call to `accept` or `reject` across all clones takes effect; every
/// later call returns `false` and does nothing.
#[derive(Debug, Clone)]
pub struct HandshakeResponder {
    slot: Arc<Slot>,
}

impl HandshakeResponder {
    /// Creates a responder and the receiving end the pipeline waits on.
    pub fn new() -> (Self, DecisionReceiver) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let receiver = DecisionReceiver {
            rx,
            slot: Arc::downgrade(&slot),
        };
        (Self { slot }, receiver)
    }

    /// Accepts the upgrade. Returns whether this call took effect.
    pub fn accept(&self, acceptance: Acceptance) -> bool {
        self.decide(HandshakeDecision::Accept(acceptance))
    }

    /// Rejects the upgrade with an HTTP status. Returns whether this call
    /// took effect.
    pub fn reject(&self, status: u16, message: impl Into<String>) -> bool {
        self.decide(HandshakeDecision::Reject {
            status,
            message: message.into(),
        })
    }

    /// Whether a decision has been made (or the upgrade abandoned).
    pub fn is_decided(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn decide(&self, decision: HandshakeDecision) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

/// The pipeline's end of a [`HandshakeResponder`].
#[derive(Debug)]
pub struct DecisionReceiver {
    rx: oneshot::Receiver<HandshakeDecision>,
    slot: Weak<Slot>,
}

impl DecisionReceiver {
    /// Waits for the decision. `None` means every responder was dropped
    /// without deciding.
    pub async fn recv(&mut self) -> Option<HandshakeDecision> {
        (&mut self.rx).await.ok()
    }

    /// Makes every later `accept`/`reject` a no-op.
    pub fn revoke(&self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.lock().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_decision_wins() {
        let (responder, mut rx) = HandshakeResponder::new();

        assert!(responder.reject(401, "nope"));
        assert!(!responder.accept(Acceptance::default()));
        assert!(!responder.reject(403, "also nope"));
        assert!(responder.is_decided());

        match rx.recv().await {
            Some(HandshakeDecision::Reject { status, .. }) => {
                assert_eq!(status, 401)
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decision_from_clone_counts_once() {
        let (responder, mut rx) = HandshakeResponder::new();
        let clone = responder.clone();

        let task = tokio::spawn(async move {
            clone.accept(Acceptance::default().with_protocol("ocpp1.6"))
        });
        assert!(task.await.unwrap());
        assert!(!responder.reject(500, "late"));

        match rx.recv().await {
            Some(HandshakeDecision::Accept(acceptance)) => {
                assert_eq!(acceptance.protocol.as_deref(), Some("ocpp1.6"));
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_responders_dropped_yields_none() {
        let (responder, mut rx) = HandshakeResponder::new();
        let clone = responder.clone();
        drop(responder);
        drop(clone);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_makes_later_decisions_no_ops() {
        let (responder, rx) = HandshakeResponder::new();
        rx.revoke();
        assert!(!responder.accept(Acceptance::default()));
        assert!(responder.is_decided());
    }

    #[tokio::test]
    async fn test_accept_all_accepts() {
        let (responder, mut rx) = HandshakeResponder::new();
        let ctx = HandshakeContext::from_request(
            &chargewire_transport::UpgradeRequest::parse(
                b"GET /EVSE-1 HTTP/1.1\r\n\r\n",
            )
            .unwrap(),
            "127.0.0.1:1".parse().unwrap(),
            chargewire_transport::ConnectionId::new(1),
        )
        .unwrap();

        AcceptAll
            .authenticate(responder, Arc::new(ctx), CancellationToken::new())
            .await;
        assert!(matches!(rx.recv().await, Some(HandshakeDecision::Accept(_))));
    }
}
