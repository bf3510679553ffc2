//! Per-connection handshake pipeline.
//!
//! Each accepted TCP connection gets its own Tokio task running this
//! handler. The flow is:
//!   1. Read the upgrade request head → build the [`HandshakeContext`]
//!   2. Ask the authenticator, racing its decision against the peer
//!      hanging up, the handshake timeout, and server shutdown
//!   3. Negotiate the sub-protocol and apply the duplicate-identity policy
//!   4. Write the `101` response → register the session → start its I/O

use std::sync::Arc;

use chargewire_session::{
    Authenticator, CloseOptions, HandshakeContext, HandshakeDecision,
    HandshakeResponder, Session, SessionError, SessionInit, close_code,
    negotiate_protocol,
};
use chargewire_transport::{IncomingConnection, TransportError};
use tokio_util::sync::CancellationToken;

use crate::ChargewireError;
use crate::config::DuplicateIdentityPolicy;
use crate::registry::{Registry, ServerState};
use crate::server::Shared;

enum Outcome {
    Decided(Option<HandshakeDecision>),
    PeerGone,
    Cancelled,
    TimedOut,
}

/// Runs the handshake for one connection and, on acceptance, hands it
/// over to a new session.
pub(crate) async fn handle_connection<A: Authenticator>(
    mut incoming: IncomingConnection,
    shared: Arc<Shared<A>>,
) -> Result<(), ChargewireError> {
    let conn_id = incoming.id();
    let remote_addr = incoming.remote_addr();

    let read = tokio::time::timeout(
        shared.config.request_timeout,
        incoming.read_request(),
    )
    .await;
    let request = match read {
        Ok(Ok(request)) => request,
        Ok(Err(TransportError::BadRequest(message))) => {
            return refuse(incoming, 400, &message).await;
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            tracing::debug!(%conn_id, %remote_addr, "upgrade request timed out");
            return Ok(());
        }
    };

    let handshake =
        match HandshakeContext::from_request(&request, remote_addr, conn_id) {
            Ok(handshake) => Arc::new(handshake),
            Err(e) => return refuse_with(incoming, e).await,
        };
    let identity = handshake.identity.clone();

    // registered before the state check so a concurrent shutdown either
    // sees this entry or is seen here
    let cancel = CancellationToken::new();
    let pending = shared.pending.insert(conn_id, &identity, cancel.clone());
    if shared.registry.state() != ServerState::Open {
        return refuse(incoming, 503, "server is shutting down").await;
    }

    tracing::debug!(
        %conn_id,
        %identity,
        endpoint = %handshake.endpoint,
        protocols = ?handshake.protocols,
        "authenticating"
    );
    let (responder, mut decision_rx) = HandshakeResponder::new();
    {
        let shared = Arc::clone(&shared);
        let handshake = Arc::clone(&handshake);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shared.auth.authenticate(responder, handshake, cancel).await;
        });
    }

    let deadline = async {
        match shared.config.handshake_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    let outcome = tokio::select! {
        biased;
        decision = decision_rx.recv() => Outcome::Decided(decision),
        _ = incoming.closed() => Outcome::PeerGone,
        _ = cancel.cancelled() => Outcome::Cancelled,
        _ = deadline => Outcome::TimedOut,
    };
    drop(pending);

    let acceptance = match outcome {
        Outcome::Decided(Some(HandshakeDecision::Accept(acceptance))) => {
            acceptance
        }
        Outcome::Decided(Some(HandshakeDecision::Reject { status, message })) => {
            return refuse(incoming, status, &message).await;
        }
        Outcome::Decided(None) => {
            return refuse(incoming, 500, "authentication did not complete")
                .await;
        }
        Outcome::PeerGone => {
            decision_rx.revoke();
            cancel.cancel();
            tracing::debug!(%conn_id, %identity, "peer left during authentication");
            return Ok(());
        }
        Outcome::Cancelled => {
            decision_rx.revoke();
            return refuse(incoming, 503, "server is shutting down").await;
        }
        Outcome::TimedOut => {
            decision_rx.revoke();
            cancel.cancel();
            tracing::warn!(%conn_id, %identity, "authentication timed out");
            return refuse(incoming, 503, "authentication timed out").await;
        }
    };

    let protocol = match negotiate_protocol(
        &shared.config.protocols,
        &handshake.protocols,
        acceptance.protocol.as_deref(),
    ) {
        Ok(protocol) => protocol,
        Err(e) => return refuse_with(incoming, e).await,
    };

    match shared.config.duplicate_identity {
        DuplicateIdentityPolicy::Coexist => {}
        DuplicateIdentityPolicy::RejectNew => {
            if shared.registry.get(&identity).is_some() {
                return refuse(incoming, 409, "identity already connected").await;
            }
        }
        DuplicateIdentityPolicy::ReplaceExisting => {
            let existing = shared.registry.get_all(&identity);
            if !existing.is_empty() {
                tracing::info!(
                    %identity,
                    count = existing.len(),
                    "replacing existing sessions"
                );
                let options = CloseOptions::new(
                    close_code::REPLACED,
                    "replaced by a new connection",
                );
                Registry::close_sessions(existing, &options).await;
            }
        }
    }

    let conn = incoming.accept(protocol.as_deref()).await?;
    let init = SessionInit {
        protocol,
        handshake: Some(handshake),
        data: acceptance.session,
        config: shared.config.session.clone(),
        validator: shared.validator.clone(),
        ..SessionInit::new(identity)
    };
    let (session, driver) = Session::new(conn, init);

    tracing::info!(
        identity = %session.identity(),
        %conn_id,
        %remote_addr,
        protocol = ?session.protocol(),
        "client connected"
    );
    shared.registry.register(&session);
    driver.start();

    // lost the race with a shutdown that had already snapshotted the
    // registry
    if shared.registry.state() != ServerState::Open {
        session
            .close(CloseOptions::new(
                close_code::GOING_AWAY,
                "server is shutting down",
            ))
            .await;
    }
    Ok(())
}

async fn refuse(
    incoming: IncomingConnection,
    status: u16,
    message: &str,
) -> Result<(), ChargewireError> {
    tracing::info!(
        conn_id = %incoming.id(),
        remote_addr = %incoming.remote_addr(),
        status,
        message,
        "upgrade rejected"
    );
    incoming.reject(status, message).await?;
    Ok(())
}

async fn refuse_with(
    incoming: IncomingConnection,
    error: SessionError,
) -> Result<(), ChargewireError> {
    match error {
        SessionError::HandshakeRejected { status, message } => {
            refuse(incoming, status, &message).await
        }
        other => refuse(incoming, 400, &other.to_string()).await,
    }
}
