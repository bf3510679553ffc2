//! `RpcServer` builder, accept loop, and the handle used to drive a
//! running server.
//!
//! This is the entry point for running an OCPP-J endpoint. It ties the
//! layers together: transport → handshake pipeline → session → registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chargewire_session::{
    AcceptAll, Authenticator, CloseOptions, PayloadValidator, PendingHandshakes,
    Session, SessionConfig, SessionError, close_code,
};
use chargewire_transport::WebSocketTransport;
use tokio_util::sync::CancellationToken;

use crate::ChargewireError;
use crate::config::{DuplicateIdentityPolicy, ServerConfig};
use crate::handler::handle_connection;
use crate::registry::{Registry, ServerObserver, ServerState};

/// Shared server state passed to each connection handler task.
pub(crate) struct Shared<A: Authenticator> {
    pub(crate) config: ServerConfig,
    pub(crate) auth: A,
    pub(crate) registry: Arc<Registry>,
    pub(crate) pending: PendingHandshakes,
    pub(crate) validator: Option<Arc<dyn PayloadValidator>>,
}

/// Builder for configuring and starting an [`RpcServer`].
///
/// # Example
///
/// ```rust,no_run
/// use chargewire::prelude::*;
///
/// # async fn run() -> Result<(), ChargewireError> {
/// let server = RpcServer::builder()
///     .bind("0.0.0.0:9000")
///     .protocols(["ocpp2.0.1", "ocpp1.6"])
///     .build_open()
///     .await?;
/// let handle = server.listen();
/// # handle.close(CloseOptions::default()).await;
/// # Ok(())
/// # }
/// ```
pub struct RpcServerBuilder {
    bind_addr: String,
    config: ServerConfig,
    observers: Vec<Arc<dyn ServerObserver>>,
    validator: Option<Arc<dyn PayloadValidator>>,
}

impl RpcServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            config: ServerConfig::default(),
            observers: Vec::new(),
            validator: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sub-protocols the server speaks, most preferred first.
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the configuration applied to every session.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Bounds how long the authenticator may take to decide.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = Some(timeout);
        self
    }

    /// Bounds how long a client may take to send its request head.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn duplicate_identity(mut self, policy: DuplicateIdentityPolicy) -> Self {
        self.config.duplicate_identity = policy;
        self
    }

    /// Adds a lifecycle observer. Observers are notified in the order they
    /// were added.
    pub fn observer(mut self, observer: impl ServerObserver) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Sets the payload validator used by sessions in strict mode.
    pub fn validator(mut self, validator: impl PayloadValidator) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Validates the configuration, binds the listener, and returns a
    /// server ready to [`listen`](RpcServer::listen).
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<RpcServer<A>, ChargewireError> {
        self.config.validate()?;
        if self.config.session.strict_mode && self.validator.is_none() {
            return Err(SessionError::Configuration(
                "strict_mode requires a payload validator".into(),
            )
            .into());
        }

        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let shared = Arc::new(Shared {
            config: self.config,
            auth,
            registry: Registry::new(self.observers),
            pending: PendingHandshakes::new(),
            validator: self.validator,
        });

        Ok(RpcServer { transport, shared })
    }

    /// Like [`build`](Self::build), accepting every upgrade.
    pub async fn build_open(self) -> Result<RpcServer<AcceptAll>, ChargewireError> {
        self.build(AcceptAll).await
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, not yet listening server.
///
/// Call [`listen`](Self::listen) to start accepting connections.
pub struct RpcServer<A: Authenticator = AcceptAll> {
    transport: WebSocketTransport,
    shared: Arc<Shared<A>>,
}

impl RpcServer {
    /// Creates a new builder.
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }
}

impl<A: Authenticator> RpcServer<A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Spawns the accept loop and returns a handle to the running server.
    ///
    /// Every accepted connection runs its handshake on its own task, so a
    /// slow authenticator never holds up other connections.
    pub fn listen(self) -> ServerHandle {
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        let local_addr = self.transport.local_addr().ok();

        let handle = ServerHandle {
            registry: Arc::clone(&self.shared.registry),
            pending: self.shared.pending.clone(),
            shutdown: shutdown.clone(),
            stopped: stopped.clone(),
            local_addr,
        };

        tokio::spawn(accept_loop(self.transport, self.shared, shutdown, stopped));
        handle
    }

    /// Listens until `signal` resolves, then closes every session with
    /// code 1001.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let handle = self.listen();
        tokio::select! {
            _ = signal => {
                handle
                    .close(CloseOptions::new(
                        close_code::GOING_AWAY,
                        "server shutting down",
                    ))
                    .await;
            }
            _ = handle.closed() => {}
        }
    }
}

async fn accept_loop<A: Authenticator>(
    transport: WebSocketTransport,
    shared: Arc<Shared<A>>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
) {
    tracing::info!(addr = ?transport.local_addr().ok(), "chargewire server running");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = transport.accept() => accepted,
        };

        match accepted {
            Ok(incoming) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let conn_id = incoming.id();
                    if let Err(e) = handle_connection(incoming, shared).await {
                        tracing::debug!(
                            %conn_id,
                            error = %e,
                            "handshake ended with error"
                        );
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                // typically out of file descriptors; let some close
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    tracing::debug!("accept loop stopped");
    stopped.cancel();
}

/// A handle to a listening server. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<Registry>,
    pending: PendingHandshakes,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    local_addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// The address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.registry.state()
    }

    /// The most recently connected live session for `identity`.
    pub fn get_session(&self, identity: &str) -> Option<Session> {
        self.registry.get(identity)
    }

    /// Every live session.
    pub fn sessions(&self) -> Vec<Session> {
        self.registry.all()
    }

    /// Number of upgrades waiting for an authentication decision.
    pub fn pending_handshakes(&self) -> usize {
        self.pending.len()
    }

    /// Stops accepting, cancels pending handshakes, and closes every live
    /// session concurrently with `options`.
    ///
    /// Calling it again (or concurrently) waits for the first close.
    pub async fn close(&self, options: CloseOptions) {
        if !self.registry.advance(ServerState::Closing) {
            self.registry.closed().await;
            return;
        }
        tracing::info!(
            sessions = self.registry.len(),
            pending = self.pending.len(),
            "server closing"
        );

        self.shutdown.cancel();
        self.pending.cancel_all();
        Registry::close_sessions(self.registry.all(), &options).await;
        self.stopped.cancelled().await;

        self.registry.advance(ServerState::Closed);
        tracing::info!("server closed");
    }

    /// Resolves once the server is closed.
    pub async fn closed(&self) {
        self.registry.closed().await;
    }
}
