//! # chargewire
//!
//! OCPP-J RPC over WebSocket for central systems.
//!
//! chargewire accepts charge point connections, runs an asynchronous
//! handshake pipeline (identity, Basic credentials, sub-protocol
//! negotiation, your authenticator), and turns each accepted connection
//! into a [`Session`](chargewire_session::Session) that can both issue and
//! answer RPC calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chargewire::prelude::*;
//!
//! struct Central;
//!
//! impl ServerObserver for Central {
//!     fn on_client_connected(&self, session: &Session) {
//!         session.handle_method("Heartbeat", |_call| async {
//!             Ok(json!({ "currentTime": "2026-01-01T00:00:00Z" }))
//!         });
//!     }
//! }
//!
//! # async fn run() -> Result<(), ChargewireError> {
//! let server = RpcServer::builder()
//!     .bind("0.0.0.0:9000")
//!     .protocols(["ocpp1.6"])
//!     .observer(Central)
//!     .build_open()
//!     .await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
mod registry;
mod server;

pub use config::{DuplicateIdentityPolicy, ServerConfig};
pub use error::ChargewireError;
pub use registry::{ServerObserver, ServerState};
pub use server::{RpcServer, RpcServerBuilder, ServerHandle};

pub use chargewire_protocol as protocol;
pub use chargewire_session as session;
pub use chargewire_transport as transport;

/// Everything needed to write a central system.
pub mod prelude {
    pub use crate::{
        ChargewireError, DuplicateIdentityPolicy, RpcServer, RpcServerBuilder,
        ServerConfig, ServerHandle, ServerObserver, ServerState,
    };
    pub use chargewire_protocol::{Map, RpcError, RpcErrorCode, Value, json};
    pub use chargewire_session::{
        AcceptAll, Acceptance, Authenticator, CallIdStrategy, CloseInfo,
        CloseOptions, HandshakeContext, HandshakeResponder, InboundCall,
        PayloadKind, PayloadValidator, Session, SessionConfig, SessionError,
        SessionState, close_code,
    };
    pub use tokio_util::sync::CancellationToken;
}
