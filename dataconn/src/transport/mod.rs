//! Transport glue: the `Wire` abstraction the protocol layers are built on,
//! plus the `AuthenticatedListener`/`Connecter` seams transports plug into,
//! and the concrete TCP-shaped, stdinserver-shaped, and in-process transports.
//!
//! The protocol layers (`TimeoutConn`, `HeartbeatConn`, `StreamConn`) never
//! talk to a concrete socket type directly; they're generic over a wire's
//! already-split read/write halves so that the reader and writer can run as
//! fully independent, concurrently-scheduled tasks.

pub mod local;
pub mod stdinserver;
pub mod tcp;

use std::io;
use std::os::fd::RawFd;

use crate::client_identity::ClientIdentity;

/// A duplex connection that can be split into independent read and write halves.
///
/// Transports implement this once per concrete connection type; everything
/// above this layer works only in terms of the split halves.
pub trait Wire: Send + 'static {
    type Read: compio::io::AsyncRead + Unpin + Send + 'static;
    type Write: compio::io::AsyncWrite + Unpin + Send + 'static;

    fn into_split(self) -> (Self::Read, Self::Write);
}

/// Optional capability: a write half backed by a real OS handle.
///
/// Mirrors the original's optional `net.Conn` -> raw fd probe, used by code
/// that wants to apply OS-level socket tuning with no portable async API for
/// it. Transports without a raw OS handle (e.g. the in-process transport)
/// simply don't implement this.
pub trait RawHandle {
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Optional capability: half-close the write direction without affecting reads.
#[async_trait::async_trait]
pub trait CloseWrite {
    async fn close_write(&mut self) -> io::Result<()>;
}

/// A `Wire` together with the peer identity an `AuthenticatedListener`
/// validated during accept.
pub struct AuthConn<W: Wire> {
    wire: W,
    client_identity: ClientIdentity,
}

impl<W: Wire> AuthConn<W> {
    #[must_use]
    pub fn new(wire: W, client_identity: ClientIdentity) -> Self {
        Self { wire, client_identity }
    }

    #[must_use]
    pub fn client_identity(&self) -> &ClientIdentity {
        &self.client_identity
    }

    #[must_use]
    pub fn into_parts(self) -> (W, ClientIdentity) {
        (self.wire, self.client_identity)
    }
}

/// A listener that produces connections already bound to a validated client
/// identity. Transports implement this directly; `ListenerAdaptor`
/// (`crate::listener_adaptor`) turns the fallible `accept` below into an
/// infallible one for callers that just want "give me the next connection".
#[async_trait::async_trait]
pub trait AuthenticatedListener: Send {
    type Conn: Wire;

    async fn accept(&self) -> io::Result<AuthConn<Self::Conn>>;

    /// Human-readable local address, for logging.
    fn addr(&self) -> String;

    async fn close(&self) -> io::Result<()>;
}

/// Builds an `AuthenticatedListener` bound to some local address/configuration.
#[async_trait::async_trait]
pub trait AuthenticatedListenerFactory {
    type Listener: AuthenticatedListener;

    async fn listen(&self) -> io::Result<Self::Listener>;
}

/// The client side of a transport: dials out and returns a `Wire`.
#[async_trait::async_trait]
pub trait Connecter: Send + Sync {
    type Conn: Wire;

    async fn connect(&self) -> io::Result<Self::Conn>;
}
