//! dataconn: framed, heartbeated, duplex stream/message transport.
//!
//! Layers, leaves first:
//! - [`timeoutconn`] — per-call read/write deadlines over a split duplex connection.
//! - [`heartbeatconn`] — frames the byte stream, injects periodic heartbeats,
//!   declares the peer dead on silence.
//! - [`streamconn`] — message and stream multiplexing with per-direction
//!   cleanliness, on top of `heartbeatconn`.
//! - [`listener_adaptor`] — turns a listener whose `accept` may fail
//!   transiently into one whose `accept` never does.
//! - [`keepalive`] — latches a timeout on an otherwise-blocking reader, used
//!   for long-running ZFS send pipes.
//! - [`transport`] — the `Wire`/`AuthConn`/`AuthenticatedListener` contracts
//!   plus concrete TCP-shaped, stdinserver-shaped, and in-process transports.
//!
//! `frame`, `client_identity`, `streamcopier` and `error` hold the shared wire
//! format, the client-identity validator, the stream-source capability, and
//! the crate's error types respectively.

#![deny(unsafe_code)]
#![allow(clippy::module_inception)]

pub mod client_identity;
pub mod env;
pub mod error;
pub mod frame;
pub mod heartbeatconn;
pub mod keepalive;
pub mod listener_adaptor;
pub mod streamconn;
pub mod streamcopier;
pub mod timeoutconn;
pub mod transport;

pub use client_identity::ClientIdentity;
pub use error::{DataconnError, ReadStreamError, ReadStreamErrorKind, StreamCopierError};
pub use frame::{Frame, is_public_frame_type};
pub use heartbeatconn::{HeartbeatConn, HeartbeatConnConfig};
pub use keepalive::{KeepaliveConfig, KeepaliveReadCloser};
pub use listener_adaptor::ListenerAdaptor;
pub use streamconn::StreamConn;
pub use streamcopier::{SinkWriter, StreamCopier};
pub use timeoutconn::{TimeoutConn, TimeoutConnConfig};
