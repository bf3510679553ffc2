//! Wire protocol for chargewire.
//!
//! This crate defines the frames that charge points and central systems
//! exchange over OCPP-J:
//!
//! - **Frames** ([`Frame`], [`MessageType`]): the `CALL`, `CALLRESULT` and
//!   `CALLERROR` JSON arrays.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames are converted
//!   to and from bytes.
//! - **Errors** ([`RpcError`], [`RpcErrorCode`], [`ProtocolError`]): the
//!   error codes a peer can report, and what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (correlation of calls and handlers). It knows nothing about sockets or
//! charge points; it only knows the frame grammar.
//!
//! ```text
//! Transport (bytes) → Protocol (Frame) → Session (calls, handlers)
//! ```

mod codec;
mod error;
mod frame;

pub use codec::{Codec, JsonCodec};
pub use error::{ProtocolError, RpcError, RpcErrorCode};
pub use frame::{Frame, MessageType};

/// Re-exported so downstream crates build params and results with the same
/// `Value` type the frames carry.
pub use serde_json::{Map, Value, json};
