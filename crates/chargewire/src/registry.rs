//! The set of live sessions, keyed by identity.

use std::collections::HashMap;
use std::sync::Arc;

use chargewire_session::{CloseInfo, CloseOptions, Session};
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Lifecycle of the server as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Open,
    Closing,
    Closed,
}

/// Receives session lifecycle events.
///
/// Both methods default to doing nothing. They are called synchronously
/// from the connection task, so they should not block; spawn for anything
/// slow.
///
/// # Example
///
/// ```rust
/// use chargewire::prelude::*;
///
/// struct Greeter;
///
/// impl ServerObserver for Greeter {
///     fn on_client_connected(&self, session: &Session) {
///         session.handle_method("Heartbeat", |_call| async {
///             Ok(json!({ "currentTime": "2026-01-01T00:00:00Z" }))
///         });
///     }
/// }
/// ```
pub trait ServerObserver: Send + Sync + 'static {
    /// A session was registered. Its I/O has not started yet, so handlers
    /// installed here see every inbound call.
    fn on_client_connected(&self, session: &Session) {
        let _ = session;
    }

    /// A session closed and was removed from the registry.
    fn on_client_closed(&self, session: &Session, info: &CloseInfo) {
        let _ = (session, info);
    }
}

pub(crate) struct Registry {
    sessions: Mutex<HashMap<String, Vec<Session>>>,
    observers: Vec<Arc<dyn ServerObserver>>,
    state: watch::Sender<ServerState>,
}

impl Registry {
    pub(crate) fn new(observers: Vec<Arc<dyn ServerObserver>>) -> Arc<Self> {
        let (state, _) = watch::channel(ServerState::Open);
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            observers,
            state,
        })
    }

    pub(crate) fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Moves the state forward. Returns whether it changed.
    pub(crate) fn advance(&self, to: ServerState) -> bool {
        self.state.send_if_modified(|state| {
            if to > *state {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Closed).await;
    }

    /// Adds a session, tells the observers, and unregisters it again once
    /// it closes.
    pub(crate) fn register(self: &Arc<Self>, session: &Session) {
        self.sessions
            .lock()
            .entry(session.identity().to_owned())
            .or_default()
            .push(session.clone());

        for observer in &self.observers {
            observer.on_client_connected(session);
        }

        let registry = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            let info = session.closed().await;
            registry.unregister(&session, &info);
        });
    }

    fn unregister(&self, session: &Session, info: &CloseInfo) {
        {
            let mut sessions = self.sessions.lock();
            if let Some(list) = sessions.get_mut(session.identity()) {
                list.retain(|s| s.connection_id() != session.connection_id());
                if list.is_empty() {
                    sessions.remove(session.identity());
                }
            }
        }
        tracing::info!(
            identity = %session.identity(),
            conn_id = %session.connection_id(),
            code = info.code,
            "client disconnected"
        );
        for observer in &self.observers {
            observer.on_client_closed(session, info);
        }
    }

    /// The most recently registered session for `identity`.
    pub(crate) fn get(&self, identity: &str) -> Option<Session> {
        self.sessions
            .lock()
            .get(identity)
            .and_then(|list| list.last().cloned())
    }

    /// Every session registered for `identity`, oldest first.
    pub(crate) fn get_all(&self, identity: &str) -> Vec<Session> {
        self.sessions.lock().get(identity).cloned().unwrap_or_default()
    }

    pub(crate) fn all(&self) -> Vec<Session> {
        self.sessions.lock().values().flatten().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().values().map(Vec::len).sum()
    }

    /// Closes sessions concurrently and waits for all of them.
    pub(crate) async fn close_sessions(
        sessions: Vec<Session>,
        options: &CloseOptions,
    ) {
        join_all(sessions.iter().map(|s| s.close(options.clone()))).await;
    }
}
