//! TCP-shaped transport.
//!
//! Stands in for the original's TLS transport with certificate-derived client
//! identity (TLS certificate validation is out of scope here; see
//! `SPEC_FULL.md` §1). In its place, the client identity is exchanged as a
//! small length-prefixed handshake sent immediately after connecting, and the
//! rest of the transport — framing, heartbeats, streams — is unaffected by
//! the substitution.
//!
//! Splitting a connection into independent read/write halves is done by
//! duplicating the socket's file descriptor: `compio::net::TcpStream`
//! implements both `AsyncRead` and `AsyncWrite` directly, so the duplicated
//! fd becomes a second, fully independent `TcpStream` handle onto the same
//! socket, with no shared lock between the two directions.

#![allow(unsafe_code)]

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::net::{TcpListener as CompioTcpListener, TcpStream};
use socket2::Socket;

use crate::client_identity::ClientIdentity;
use crate::transport::{AuthConn, AuthenticatedListener, AuthenticatedListenerFactory, CloseWrite, Connecter, RawHandle, Wire};

const MAX_IDENTITY_LEN: u32 = 256;

async fn read_identity_handshake(stream: &mut TcpStream) -> io::Result<ClientIdentity> {
    let len_buf = vec![0u8; 4];
    let compio::buf::BufResult(res, len_buf) = stream.read_exact(len_buf).await;
    res?;
    let len = u32::from_be_bytes([len_buf[0], len_buf[1], len_buf[2], len_buf[3]]);
    if len == 0 || len > MAX_IDENTITY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client identity handshake length out of range",
        ));
    }
    let name_buf = vec![0u8; len as usize];
    let compio::buf::BufResult(res, name_buf) = stream.read_exact(name_buf).await;
    res?;
    let name = String::from_utf8(name_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    ClientIdentity::parse(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

async fn write_identity_handshake(stream: &mut TcpStream, identity: &ClientIdentity) -> io::Result<()> {
    let name = identity.as_str().as_bytes().to_vec();
    let len = (name.len() as u32).to_be_bytes().to_vec();
    stream.write_all(len).await.0?;
    stream.write_all(name).await.0?;
    Ok(())
}

fn dup_as_tcp_stream(stream: &TcpStream) -> io::Result<TcpStream> {
    let fd = stream.as_raw_fd();
    let borrowed = unsafe { Socket::from_raw_fd(fd) };
    let cloned = borrowed.try_clone();
    std::mem::forget(borrowed);
    let cloned = cloned?;
    TcpStream::from_std(cloned.into())
}

/// A TCP connection wrapped as a `Wire`.
pub struct TcpWire {
    stream: TcpStream,
}

impl TcpWire {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Wire for TcpWire {
    type Read = TcpStream;
    type Write = TcpStream;

    fn into_split(self) -> (Self::Read, Self::Write) {
        let write_half = dup_as_tcp_stream(&self.stream).expect("duplicate TCP socket fd for write half");
        (self.stream, write_half)
    }
}

impl RawHandle for TcpStream {
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

#[async_trait]
impl CloseWrite for TcpStream {
    async fn close_write(&mut self) -> io::Result<()> {
        let fd = self.as_raw_fd();
        let sock = unsafe { Socket::from_raw_fd(fd) };
        let result = sock.shutdown(std::net::Shutdown::Write);
        std::mem::forget(sock);
        result
    }
}

/// Listens for plain TCP connections and performs the identity handshake.
pub struct TcpListener {
    inner: CompioTcpListener,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = CompioTcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            inner,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AuthenticatedListener for TcpListener {
    type Conn = TcpWire;

    async fn accept(&self) -> io::Result<AuthConn<Self::Conn>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener is closed"));
        }
        let (mut stream, _peer_addr) = self.inner.accept().await?;
        let identity = read_identity_handshake(&mut stream).await?;
        Ok(AuthConn::new(TcpWire::new(stream), identity))
    }

    fn addr(&self) -> String {
        self.local_addr.to_string()
    }

    /// Shuts down the listening socket so an `accept()` blocked in the
    /// background task wakes with an error instead of hanging forever.
    ///
    /// Idempotent: closing an already-closed listener is a no-op.
    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let fd = self.inner.as_raw_fd();
        let sock = unsafe { Socket::from_raw_fd(fd) };
        let result = sock.shutdown(std::net::Shutdown::Both);
        std::mem::forget(sock);
        result
    }
}

/// Builds a [`TcpListener`] bound to a fixed address.
pub struct TcpListenerFactory {
    pub addr: SocketAddr,
}

#[async_trait]
impl AuthenticatedListenerFactory for TcpListenerFactory {
    type Listener = TcpListener;

    async fn listen(&self) -> io::Result<Self::Listener> {
        TcpListener::bind(self.addr).await
    }
}

/// Dials a fixed TCP address and announces `client_identity` to the peer.
pub struct TcpConnecter {
    pub addr: SocketAddr,
    pub client_identity: ClientIdentity,
}

#[async_trait]
impl Connecter for TcpConnecter {
    type Conn = TcpWire;

    async fn connect(&self) -> io::Result<Self::Conn> {
        let mut stream = TcpStream::connect(self.addr).await?;
        write_identity_handshake(&mut stream, &self.client_identity).await?;
        Ok(TcpWire::new(stream))
    }
}
