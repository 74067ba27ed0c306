//! In-process transport: connects two endpoints in the same process by name,
//! with no network or filesystem involved.
//!
//! Endpoint names live in a process-global registry (a named listener
//! "binds" a name; a connecter "dials" it), mirroring the original's
//! in-process inproc-style transport. The actual byte stream between the two
//! sides is a real connected Unix domain socket pair: reusing
//! `compio::net::UnixStream`'s existing `AsyncRead`/`AsyncWrite`
//! implementation for both named halves, rather than hand-rolling a channel
//! that would have to reimplement those traits from scratch.

use std::io;
use std::os::fd::FromRawFd;

use async_trait::async_trait;
use compio::net::UnixStream;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use socket2::{Domain, Socket, Type};

use crate::client_identity::ClientIdentity;
use crate::transport::{AuthConn, AuthenticatedListener, AuthenticatedListenerFactory, Connecter, Wire};

struct PendingConn {
    server_half: UnixStream,
    client_identity: ClientIdentity,
}

static REGISTRY: Lazy<DashMap<String, flume::Sender<PendingConn>>> = Lazy::new(DashMap::new);

/// Validate a local transport endpoint name: same rule as a client identity
/// (single non-empty path component), since both name a single peer.
pub fn validate_endpoint_name(name: &str) -> io::Result<()> {
    crate::client_identity::validate_client_identity(name)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

fn socketpair() -> io::Result<(UnixStream, UnixStream)> {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None)?;
    a.set_nonblocking(true)?;
    b.set_nonblocking(true)?;
    let a: std::os::unix::net::UnixStream = a.into();
    let b: std::os::unix::net::UnixStream = b.into();
    Ok((UnixStream::from_std(a)?, UnixStream::from_std(b)?))
}

/// A connection accepted or dialed over the in-process transport.
pub struct LocalWire {
    stream: UnixStream,
}

impl Wire for LocalWire {
    type Read = UnixStream;
    type Write = UnixStream;

    fn into_split(self) -> (Self::Read, Self::Write) {
        let fd = unsafe_dup(&self.stream).expect("duplicate local socket fd for write half");
        (self.stream, fd)
    }
}

#[allow(unsafe_code)]
fn unsafe_dup(stream: &UnixStream) -> io::Result<UnixStream> {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let borrowed = unsafe { Socket::from_raw_fd(fd) };
    let cloned = borrowed.try_clone();
    std::mem::forget(borrowed);
    let cloned = cloned?;
    let std_stream: std::os::unix::net::UnixStream = cloned.into();
    UnixStream::from_std(std_stream)
}

/// Binds a name in the process-global registry and accepts connections dialed
/// against it.
pub struct LocalListener {
    name: String,
    rx: flume::Receiver<PendingConn>,
}

impl LocalListener {
    pub fn bind(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        validate_endpoint_name(&name)?;
        let (tx, rx) = flume::unbounded();
        if REGISTRY.insert(name.clone(), tx).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("local transport name {name:?} is already bound"),
            ));
        }
        Ok(Self { name, rx })
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        REGISTRY.remove(&self.name);
    }
}

#[async_trait]
impl AuthenticatedListener for LocalListener {
    type Conn = LocalWire;

    async fn accept(&self) -> io::Result<AuthConn<Self::Conn>> {
        let pending = self
            .rx
            .recv_async()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "local listener closed"))?;
        Ok(AuthConn::new(LocalWire { stream: pending.server_half }, pending.client_identity))
    }

    fn addr(&self) -> String {
        format!("local:{}", self.name)
    }

    async fn close(&self) -> io::Result<()> {
        REGISTRY.remove(&self.name);
        Ok(())
    }
}

/// Builds a [`LocalListener`] bound to a fixed name.
pub struct LocalListenerFactory {
    pub name: String,
}

#[async_trait]
impl AuthenticatedListenerFactory for LocalListenerFactory {
    type Listener = LocalListener;

    async fn listen(&self) -> io::Result<Self::Listener> {
        LocalListener::bind(self.name.clone())
    }
}

/// Dials a name previously bound with [`LocalListener::bind`].
pub struct LocalConnecter {
    pub name: String,
    pub client_identity: ClientIdentity,
}

#[async_trait]
impl Connecter for LocalConnecter {
    type Conn = LocalWire;

    async fn connect(&self) -> io::Result<Self::Conn> {
        let tx = REGISTRY
            .get(&self.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no local transport listener registered for {:?}", self.name),
                )
            })?;
        let (server_half, client_half) = socketpair()?;
        tx.send_async(PendingConn {
            server_half,
            client_identity: self.client_identity.clone(),
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "local transport listener went away"))?;
        Ok(LocalWire { stream: client_half })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn connect_to_unregistered_name_fails() {
        let connecter = LocalConnecter {
            name: "does-not-exist".to_owned(),
            client_identity: ClientIdentity::parse("whoever").unwrap(),
        };
        let err = connecter.connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[compio::test]
    async fn registered_name_accepts_and_carries_identity() {
        let listener = LocalListener::bind("test-endpoint-a").unwrap();
        let connecter = LocalConnecter {
            name: "test-endpoint-a".to_owned(),
            client_identity: ClientIdentity::parse("dialer").unwrap(),
        };

        let (accepted, connected) = futures::join!(listener.accept(), connecter.connect());
        let accepted = accepted.unwrap();
        assert_eq!(accepted.client_identity().as_str(), "dialer");
        connected.unwrap();
    }

    #[compio::test]
    async fn rebinding_same_name_fails_until_dropped() {
        let first = LocalListener::bind("test-endpoint-b").unwrap();
        let err = LocalListener::bind("test-endpoint-b").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        drop(first);
        let _second = LocalListener::bind("test-endpoint-b").unwrap();
    }
}
