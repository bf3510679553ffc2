//! The RPC session: one per connected charge point.
//!
//! A [`Session`] is a cheap, cloneable handle. The work happens in three
//! background tasks started by [`SessionDriver::start`]:
//!
//! - the **reader** decodes inbound frames, resolves pending calls and
//!   dispatches inbound calls to handlers (one task per invocation);
//! - the **writer** owns the sending half and serializes every frame,
//!   ping and close frame onto the wire;
//! - the **keepalive** task (optional) pings the peer and closes the
//!   session when pongs stop coming.
//!
//! ```text
//!   Session::call ──▶ Correlator ──▶ outbound queue ──▶ writer ──▶ peer
//!                         ▲                                          │
//!                         └──────── reader ◀─────────────────────────┘
//!                                     │
//!                                     └──▶ handler task ──▶ outbound queue
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chargewire_protocol::{Codec, Frame, JsonCodec, RpcError, RpcErrorCode};
use chargewire_transport::{Connection, ConnectionId, Incoming};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;
use crate::inflight::InFlight;
use crate::{
    HandshakeContext, PayloadKind, PayloadValidator, SessionConfig,
    SessionError, close_code,
};

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Open,
    /// Closing handshake in progress. Outbound calls are still allowed;
    /// inbound calls are answered with an error.
    Closing,
    Closed,
}

/// How to close a session.
#[derive(Debug, Clone)]
pub struct CloseOptions {
    pub code: u16,
    pub reason: String,
    /// Wait for running handlers and outstanding outbound calls first.
    pub await_pending: bool,
    /// Skip the closing handshake: fail everything and drop the socket.
    pub force: bool,
    /// Upper bound on the `await_pending` wait. `None` waits indefinitely.
    pub grace: Option<Duration>,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            code: close_code::NORMAL,
            reason: String::new(),
            await_pending: false,
            force: false,
            grace: None,
        }
    }
}

impl CloseOptions {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_await_pending(mut self, grace: Option<Duration>) -> Self {
        self.await_pending = true;
        self.grace = grace;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// An inbound `CALL`, as seen by a handler.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub method: String,
    pub params: Value,
    pub message_id: String,
}

type Handler = Arc<
    dyn Fn(InboundCall) -> BoxFuture<'static, Result<Value, RpcError>>
        + Send
        + Sync,
>;

#[derive(Default)]
struct Handlers {
    wildcard: Option<Handler>,
    methods: HashMap<String, Handler>,
}

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Ping,
    Close { code: u16, reason: String },
}

/// Everything needed to construct a [`Session`].
pub struct SessionInit {
    pub identity: String,
    pub protocol: Option<String>,
    pub handshake: Option<Arc<HandshakeContext>>,
    /// Data attached by the authenticator.
    pub data: Map<String, Value>,
    /// Assumed valid; see [`SessionConfig::validate`].
    pub config: SessionConfig,
    pub validator: Option<Arc<dyn PayloadValidator>>,
}

impl SessionInit {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            protocol: None,
            handshake: None,
            data: Map::new(),
            config: SessionConfig::default(),
            validator: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_handshake(mut self, handshake: Arc<HandshakeContext>) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

struct Inner {
    identity: String,
    connection_id: ConnectionId,
    protocol: Option<String>,
    handshake: Option<Arc<HandshakeContext>>,
    data: Map<String, Value>,
    config: SessionConfig,
    validator: Option<Arc<dyn PayloadValidator>>,

    state: watch::Sender<SessionState>,
    close_info: OnceLock<CloseInfo>,
    close_sent: AtomicBool,
    /// Cancelled when the socket is to be dropped without a handshake.
    abort: CancellationToken,

    correlator: Correlator,
    handlers: RwLock<Handlers>,
    bad_messages: AtomicU32,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound_calls: Arc<InFlight>,
    outbound_calls: Arc<InFlight>,

    pongs: watch::Sender<u64>,
    last_activity: Mutex<Instant>,
}

/// A live RPC session with one peer.
///
/// Clone freely; all clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// The not-yet-running half of a session.
///
/// Lets the owner register the session and install handlers before the
/// first inbound frame is read.
pub struct SessionDriver<C: Connection> {
    inner: Arc<Inner>,
    conn: C,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Session {
    /// Wraps a connection. Nothing is read or written until the returned
    /// driver is started.
    pub fn new<C: Connection>(
        conn: C,
        init: SessionInit,
    ) -> (Self, SessionDriver<C>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Open);
        let (pongs, _) = watch::channel(0u64);
        let connection_id = conn.id();

        let inner = Arc::new(Inner {
            correlator: Correlator::new(
                init.config.call_concurrency.max(1),
                init.config.call_ids,
            ),
            identity: init.identity,
            connection_id,
            protocol: init.protocol,
            handshake: init.handshake,
            data: init.data,
            config: init.config,
            validator: init.validator,
            state,
            close_info: OnceLock::new(),
            close_sent: AtomicBool::new(false),
            abort: CancellationToken::new(),
            handlers: RwLock::new(Handlers::default()),
            bad_messages: AtomicU32::new(0),
            outbound,
            inbound_calls: InFlight::new(),
            outbound_calls: InFlight::new(),
            pongs,
            last_activity: Mutex::new(Instant::now()),
        });

        tracing::info!(
            identity = %inner.identity,
            conn_id = %connection_id,
            protocol = ?inner.protocol,
            "session opened"
        );

        let session = Self {
            inner: Arc::clone(&inner),
        };
        (session, SessionDriver { inner, conn, rx })
    }

    /// [`new`](Self::new) followed by an immediate start.
    pub fn spawn<C: Connection>(conn: C, init: SessionInit) -> Self {
        let (session, driver) = Self::new(conn, init);
        driver.start();
        session
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// The negotiated sub-protocol, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    /// The upgrade request this session came from.
    pub fn handshake(&self) -> Option<&Arc<HandshakeContext>> {
        self.inner.handshake.as_ref()
    }

    /// Data the authenticator attached on acceptance.
    pub fn data(&self) -> &Map<String, Value> {
        &self.inner.data
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Current run of consecutive malformed frames.
    pub fn bad_messages(&self) -> u32 {
        self.inner.bad_messages.load(Ordering::Acquire)
    }

    /// Outbound calls on the wire awaiting an answer.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Registers the handler for every method without a specific one.
    pub fn handle<F, Fut>(&self, handler: F)
    where
        F: Fn(InboundCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.inner.handlers.write().wildcard = Some(boxed(handler));
    }

    /// Registers the handler for one method. Takes precedence over the
    /// wildcard handler.
    pub fn handle_method<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(InboundCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.inner
            .handlers
            .write()
            .methods
            .insert(method.into(), boxed(handler));
    }

    /// Calls `method` on the peer with the configured timeout.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, SessionError> {
        self.call_with_timeout(method, params, self.inner.config.call_timeout)
            .await
    }

    /// Calls `method` on the peer.
    ///
    /// Waits for a concurrency slot first; `timeout` starts once the call
    /// is handed to the writer.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let inner = &self.inner;
        if self.state() == SessionState::Closed {
            return Err(inner.closed_error());
        }
        let _tracked = inner.outbound_calls.enter();

        inner.validate(method, PayloadKind::Request, &params)?;

        let _permit = inner
            .correlator
            .acquire()
            .await
            .ok_or_else(|| inner.closed_error())?;
        let (id, rx) = inner
            .correlator
            .register(method, timeout)
            .ok_or_else(|| inner.closed_error())?;

        if inner
            .outbound
            .send(Outbound::Frame(Frame::call(&id, method, params)))
            .is_err()
        {
            inner.correlator.take(&id);
            return Err(inner.closed_error());
        }
        tracing::debug!(identity = %inner.identity, %id, method, "call sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(inner.closed_error()),
            Err(_) => {
                inner.correlator.take(&id);
                tracing::warn!(
                    identity = %inner.identity,
                    %id,
                    method,
                    ?timeout,
                    "call timed out"
                );
                Err(SessionError::CallTimeout {
                    id,
                    method: method.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Closes the session and returns how it ended.
    ///
    /// If the session is already closing, waits for that close instead.
    /// Must not be awaited from inside one of this session's handlers with
    /// `await_pending` set: the handler would wait for itself.
    pub async fn close(&self, options: CloseOptions) -> CloseInfo {
        let inner = &self.inner;

        if options.force {
            inner.terminate(options.code, &options.reason);
            return self.closed().await;
        }
        if !inner.advance(SessionState::Closing) {
            return self.closed().await;
        }
        tracing::info!(
            identity = %inner.identity,
            code = options.code,
            reason = %options.reason,
            "closing session"
        );

        if options.await_pending {
            let settle = async {
                tokio::join!(
                    inner.inbound_calls.wait_idle(),
                    inner.outbound_calls.wait_idle()
                );
            };
            match options.grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, settle).await.is_err() {
                        tracing::debug!(
                            identity = %inner.identity,
                            "grace period over with work still pending"
                        );
                    }
                }
                None => settle.await,
            }
        }

        let info = inner
            .close_info
            .get_or_init(|| CloseInfo {
                code: options.code,
                reason: options.reason.clone(),
            })
            .clone();
        inner.correlator.fail_all(info.code, &info.reason);
        inner.send_close(options.code, &options.reason);

        let closed = tokio::time::timeout(inner.config.close_timeout, self.closed());
        if closed.await.is_err() {
            tracing::warn!(
                identity = %inner.identity,
                "peer did not answer the close frame"
            );
            inner.terminate(options.code, &options.reason);
        }
        self.closed().await
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) -> CloseInfo {
        let mut state = self.inner.state.subscribe();
        // the sender lives as long as `self`, so this cannot fail early
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
        self.inner.current_close_info()
    }

    /// How the session ended, once it has.
    pub fn close_info(&self) -> Option<CloseInfo> {
        match self.state() {
            SessionState::Closed => Some(self.inner.current_close_info()),
            _ => None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.inner.identity)
            .field("connection_id", &self.inner.connection_id)
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .finish()
    }
}

fn boxed<F, Fut>(handler: F) -> Handler
where
    F: Fn(InboundCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |call| handler(call).boxed())
}

impl Inner {
    /// Moves the state forward. Returns whether it changed.
    fn advance(&self, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if to > *state {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn current_close_info(&self) -> CloseInfo {
        self.close_info.get().cloned().unwrap_or_else(|| CloseInfo {
            code: close_code::ABNORMAL,
            reason: "session closed".into(),
        })
    }

    fn closed_error(&self) -> SessionError {
        let info = self.current_close_info();
        SessionError::ConnectionClosed {
            code: info.code,
            reason: info.reason,
        }
    }

    /// Marks the session closed and fails everything still pending.
    fn finish(&self, code: u16, reason: &str) {
        let info = self.close_info.get_or_init(|| CloseInfo {
            code,
            reason: reason.to_owned(),
        });
        if self.advance(SessionState::Closed) {
            self.correlator.fail_all(info.code, &info.reason);
            tracing::info!(
                identity = %self.identity,
                conn_id = %self.connection_id,
                code = info.code,
                reason = %info.reason,
                "session closed"
            );
        }
    }

    /// [`finish`](Self::finish), then drop the socket without a handshake.
    fn terminate(&self, code: u16, reason: &str) {
        self.finish(code, reason);
        self.abort.cancel();
    }

    /// Queues our close frame, once.
    fn send_close(&self, code: u16, reason: &str) {
        if !self.close_sent.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            });
        }
    }

    fn send_frame(&self, frame: Frame) {
        // a closed queue means the writer is gone; nothing to do
        let _ = self.outbound.send(Outbound::Frame(frame));
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn validate(
        &self,
        method: &str,
        kind: PayloadKind,
        payload: &Value,
    ) -> Result<(), RpcError> {
        if !self.config.strict_mode {
            return Ok(());
        }
        match (&self.validator, &self.protocol) {
            (Some(validator), Some(protocol)) => {
                validator.validate(protocol, method, kind, payload)
            }
            _ => Ok(()),
        }
    }

    fn good_message(&self) {
        self.bad_messages.store(0, Ordering::Release);
    }

    fn bad_message(self: &Arc<Self>, reason: &str) {
        let count = self.bad_messages.fetch_add(1, Ordering::AcqRel) + 1;
        let violation = SessionError::ProtocolViolation(reason.to_owned());
        tracing::warn!(identity = %self.identity, count, error = %violation, "bad message");

        let exceeded = self.config.max_bad_messages.is_some_and(|max| count > max);
        if exceeded && *self.state.borrow() == SessionState::Open {
            let session = Session {
                inner: Arc::clone(self),
            };
            tokio::spawn(async move {
                session
                    .close(CloseOptions::new(
                        close_code::PROTOCOL_ERROR,
                        "too many bad messages",
                    ))
                    .await;
            });
        }
    }

    fn handle_message(self: &Arc<Self>, data: &[u8]) {
        self.touch();

        let frame = match JsonCodec.decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                if let Some(id) = e.reply_id() {
                    self.send_frame(Frame::error(id, e.to_rpc_error()));
                }
                self.bad_message(&e.to_string());
                return;
            }
        };
        tracing::debug!(
            identity = %self.identity,
            id = frame.id(),
            kind = ?frame.message_type(),
            "frame received"
        );

        match frame {
            Frame::Call { id, method, params } => {
                self.good_message();
                self.dispatch_call(id, method, params);
            }
            Frame::CallResult { id, result } => match self.correlator.take(&id) {
                Some(call) => {
                    self.good_message();
                    let outcome = self
                        .validate(&call.method, PayloadKind::Response, &result)
                        .map(|()| result)
                        .map_err(SessionError::from);
                    call.complete(outcome);
                }
                None => self.bad_message(&format!("result for unknown call {id}")),
            },
            Frame::CallError {
                id,
                code,
                description,
                details,
            } => match self.correlator.take(&id) {
                Some(call) => {
                    self.good_message();
                    call.complete(Err(SessionError::CallError(RpcError {
                        code,
                        description,
                        details,
                    })));
                }
                None => self.bad_message(&format!("error for unknown call {id}")),
            },
        }
    }

    fn dispatch_call(self: &Arc<Self>, id: String, method: String, params: Value) {
        if *self.state.borrow() != SessionState::Open {
            self.send_frame(Frame::error(
                id,
                RpcError::new(RpcErrorCode::GenericError, "session is closing"),
            ));
            return;
        }
        if let Err(e) = self.validate(&method, PayloadKind::Request, &params) {
            self.send_frame(Frame::error(id, e));
            return;
        }

        let handler = {
            let handlers = self.handlers.read();
            handlers
                .methods
                .get(&method)
                .or(handlers.wildcard.as_ref())
                .cloned()
        };
        let Some(handler) = handler else {
            tracing::debug!(identity = %self.identity, %method, "no handler");
            self.send_frame(Frame::error(id, RpcError::not_implemented(&method)));
            return;
        };

        let guard = self.inbound_calls.enter();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let call = InboundCall {
                method: method.clone(),
                params,
                message_id: id.clone(),
            };
            let outcome = AssertUnwindSafe(async move { handler(call).await })
                .catch_unwind()
                .await;

            let reply = match outcome {
                Ok(Ok(result)) => {
                    match inner.validate(&method, PayloadKind::Response, &result) {
                        Ok(()) => Frame::result(id, result),
                        Err(e) => Frame::error(id, e),
                    }
                }
                Ok(Err(e)) => Frame::error(id, e),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        identity = %inner.identity,
                        %method,
                        %message,
                        "handler panicked"
                    );
                    let mut error = RpcError::internal("handler failed");
                    if inner.config.respond_with_detailed_errors {
                        error = error.with_details(json!({ "message": message }));
                    }
                    Frame::error(id, error)
                }
            };
            inner.send_frame(reply);
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl<C: Connection> SessionDriver<C> {
    /// Spawns the reader, writer and keepalive tasks.
    pub fn start(self) {
        let Self { inner, conn, rx } = self;
        let conn = Arc::new(conn);

        tokio::spawn(write_loop(Arc::clone(&inner), Arc::clone(&conn), rx));
        if let (Some(interval), Some(pong_timeout)) = (
            inner.config.ping_interval,
            inner.config.effective_pong_timeout(),
        ) {
            tokio::spawn(keepalive(Arc::clone(&inner), interval, pong_timeout));
        }
        tokio::spawn(read_loop(inner, conn));
    }
}

async fn read_loop<C: Connection>(inner: Arc<Inner>, conn: Arc<C>) {
    loop {
        let event = tokio::select! {
            _ = inner.abort.cancelled() => return,
            event = conn.recv() => event,
        };

        match event {
            Ok(Some(Incoming::Message(data))) => inner.handle_message(&data),
            Ok(Some(Incoming::Pong(_))) => {
                inner.pongs.send_modify(|n| *n = n.wrapping_add(1));
            }
            Ok(Some(Incoming::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (f.code, f.reason))
                    .unwrap_or((close_code::NO_STATUS, String::new()));
                tracing::debug!(identity = %inner.identity, code, %reason, "peer sent close");

                // answer with the same code; 1005 may not appear in a frame
                let echo = if code == close_code::NO_STATUS {
                    close_code::NORMAL
                } else {
                    code
                };
                inner.advance(SessionState::Closing);
                inner.send_close(echo, "");
                inner.finish(code, &reason);
                return;
            }
            Ok(None) => {
                inner.terminate(close_code::ABNORMAL, "connection lost");
                return;
            }
            Err(e) => {
                tracing::warn!(identity = %inner.identity, error = %e, "receive failed");
                inner.terminate(close_code::ABNORMAL, &e.to_string());
                return;
            }
        }
    }
}

async fn write_loop<C: Connection>(
    inner: Arc<Inner>,
    conn: Arc<C>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        let next = tokio::select! {
            _ = inner.abort.cancelled() => return,
            next = rx.recv() => next,
        };
        let Some(outbound) = next else { return };

        let result = match outbound {
            Outbound::Frame(frame) => {
                let bytes = match JsonCodec.encode_frame(&frame) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(identity = %inner.identity, error = %e, "frame not encodable");
                        continue;
                    }
                };
                inner.touch();
                conn.send(&bytes).await
            }
            Outbound::Ping => conn.ping(&[]).await,
            Outbound::Close { code, reason } => {
                if let Err(e) = conn.close(code, &reason).await {
                    tracing::debug!(identity = %inner.identity, error = %e, "close frame not sent");
                }
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!(identity = %inner.identity, error = %e, "send failed");
            inner.terminate(close_code::ABNORMAL, "send failed");
            return;
        }
    }
}

async fn keepalive(inner: Arc<Inner>, interval: Duration, pong_timeout: Duration) {
    let mut state = inner.state.subscribe();
    let mut pongs = inner.pongs.subscribe();
    let mut next_ping = Instant::now() + interval;

    loop {
        tokio::select! {
            _ = inner.abort.cancelled() => return,
            _ = left_open(&mut state) => return,
            _ = tokio::time::sleep_until(next_ping) => {}
        }

        if inner.config.defer_pings_on_activity {
            let due = *inner.last_activity.lock() + interval;
            if due > Instant::now() {
                next_ping = due;
                continue;
            }
        }

        let _ = pongs.borrow_and_update();
        if inner.outbound.send(Outbound::Ping).is_err() {
            return;
        }
        match tokio::time::timeout(pong_timeout, pongs.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return,
            Err(_) => {
                tracing::warn!(
                    identity = %inner.identity,
                    ?pong_timeout,
                    "no pong, dropping connection"
                );
                inner.terminate(close_code::ABNORMAL, "ping timeout");
                return;
            }
        }
        next_ping = Instant::now() + interval;
    }
}

async fn left_open(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|s| *s != SessionState::Open).await;
}
