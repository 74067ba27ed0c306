//! Stdinserver-shaped transport: one listener per authorized client identity,
//! each backed by its own Unix domain socket, fanned in to a single accept
//! stream.
//!
//! The original spawns one SSH-forced-command child process per client
//! identity and adapts its stdin/stdout into a `net.Conn`; spawning and
//! managing that child process is out of scope here (`SPEC_FULL.md` §1).
//! What's modeled is the part that is in scope: a fixed, pre-known set of
//! client identities, each with its own listening socket, multiplexed so a
//! caller sees a single `accept()` stream regardless of which identity's
//! socket produced the connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use compio::net::{UnixListener, UnixStream};

use crate::client_identity::ClientIdentity;
use crate::transport::{AuthConn, AuthenticatedListener, AuthenticatedListenerFactory, Wire};

/// A Unix domain socket connection wrapped as a `Wire`.
pub struct StdinserverWire {
    stream: UnixStream,
}

impl Wire for StdinserverWire {
    type Read = UnixStream;
    type Write = UnixStream;

    fn into_split(self) -> (Self::Read, Self::Write) {
        dup_unix_stream(self.stream)
    }
}

/// Restrict a freshly-bound stdinserver socket to owner-only access: only the
/// process that bound the per-identity listener (and whatever forced-command
/// mechanism hands connections to it) should be able to connect.
fn restrict_socket_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[allow(unsafe_code)]
fn dup_unix_stream(stream: UnixStream) -> (UnixStream, UnixStream) {
    use std::os::fd::{AsRawFd, FromRawFd};
    let fd = stream.as_raw_fd();
    let borrowed = unsafe { socket2::Socket::from_raw_fd(fd) };
    let cloned = borrowed.try_clone().expect("duplicate stdinserver socket fd");
    std::mem::forget(borrowed);
    let std_stream: std::os::unix::net::UnixStream = cloned.into();
    let write_half = UnixStream::from_std(std_stream).expect("wrap duplicated stdinserver fd");
    (stream, write_half)
}

struct Accepted {
    stream: UnixStream,
    client_identity: ClientIdentity,
}

/// One Unix domain socket per authorized client identity, multiplexed into a
/// single accept stream.
///
/// Grounded in the original's per-identity listener set, reimagined over real
/// `UnixListener` sockets (one per identity, at `{base_dir}/{identity}`)
/// since there is no SSH child process to derive the identity from here.
pub struct MultiStdinserverListener {
    base_dir: PathBuf,
    closed: Arc<AtomicBool>,
    rx: flume::Receiver<std::io::Result<Accepted>>,
    sockets: Vec<PathBuf>,
}

impl MultiStdinserverListener {
    /// Bind one socket per entry in `client_identities` under `base_dir`. If
    /// any socket fails to bind, every socket already opened this call is
    /// closed and removed before the error is returned.
    pub async fn bind(base_dir: impl Into<PathBuf>, client_identities: &[ClientIdentity]) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = flume::unbounded();
        let mut sockets = Vec::with_capacity(client_identities.len());

        for identity in client_identities {
            let path = base_dir.join(identity.as_str());
            let _ = std::fs::remove_file(&path);
            let listener = match UnixListener::bind(&path) {
                Ok(listener) => listener,
                Err(e) => {
                    closed.store(true, Ordering::Release);
                    for opened in &sockets {
                        let _ = std::fs::remove_file(opened);
                    }
                    return Err(e);
                }
            };
            restrict_socket_permissions(&path)?;
            sockets.push(path);

            let tx = tx.clone();
            let closed = closed.clone();
            let identity = identity.clone();
            compio::runtime::spawn(async move {
                loop {
                    if closed.load(Ordering::Acquire) {
                        return;
                    }
                    match listener.accept().await {
                        Ok((stream, _addr)) => {
                            tracing::debug!(client_identity = %identity, "stdinserver accept");
                            if tx
                                .send_async(Ok(Accepted {
                                    stream,
                                    client_identity: identity.clone(),
                                }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::error!(client_identity = %identity, error = %e, "stdinserver accept failed");
                            if tx.send_async(Err(e)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            })
            .detach();
        }

        Ok(Self {
            base_dir,
            closed,
            rx,
            sockets,
        })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl AuthenticatedListener for MultiStdinserverListener {
    type Conn = StdinserverWire;

    async fn accept(&self) -> std::io::Result<AuthConn<Self::Conn>> {
        loop {
            let item = self
                .rx
                .recv_async()
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdinserver listener closed"))?;
            match item {
                Ok(accepted) => {
                    return Ok(AuthConn::new(
                        StdinserverWire { stream: accepted.stream },
                        accepted.client_identity,
                    ));
                }
                Err(_) => continue,
            }
        }
    }

    fn addr(&self) -> String {
        format!("stdinserver:{}", self.base_dir.display())
    }

    async fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::Release);
        for path in &self.sockets {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

/// Builds a [`MultiStdinserverListener`] for a fixed base directory and set
/// of authorized client identities.
pub struct StdinserverListenerFactory {
    pub base_dir: PathBuf,
    pub client_identities: Vec<ClientIdentity>,
}

#[async_trait]
impl AuthenticatedListenerFactory for StdinserverListenerFactory {
    type Listener = MultiStdinserverListener;

    async fn listen(&self) -> std::io::Result<Self::Listener> {
        MultiStdinserverListener::bind(self.base_dir.clone(), &self.client_identities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::io::{AsyncReadExt, AsyncWriteExt};

    #[compio::test]
    async fn accepts_connection_with_identity_from_matching_socket() {
        let dir = std::env::temp_dir().join(format!("dataconn-stdinserver-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let identities = vec![ClientIdentity::parse("host-a").unwrap(), ClientIdentity::parse("host-b").unwrap()];
        let listener = MultiStdinserverListener::bind(&dir, &identities).await.unwrap();

        let socket_path = dir.join("host-b");
        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"hi".to_vec()).await.0.unwrap();

        let accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.client_identity().as_str(), "host-b");

        let (mut read_half, _write_half) = accepted.into_parts().0.into_split();
        let buf = vec![0u8; 2];
        let (res, buf) = {
            let r = read_half.read_exact(buf).await;
            (r.0, r.1)
        };
        res.unwrap();
        assert_eq!(&buf[..], b"hi");

        listener.close().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[compio::test]
    async fn bound_sockets_are_restricted_to_owner_access() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("dataconn-stdinserver-perm-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let identities = vec![ClientIdentity::parse("host-a").unwrap()];
        let listener = MultiStdinserverListener::bind(&dir, &identities).await.unwrap();

        let mode = std::fs::metadata(dir.join("host-a")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);

        listener.close().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[compio::test]
    async fn partial_bind_failure_rolls_back_previously_opened_sockets() {
        let dir = std::env::temp_dir().join(format!("dataconn-stdinserver-rollback-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let blocked_path = dir.join("host-b");
        std::fs::create_dir_all(&blocked_path).unwrap();

        let identities = vec![ClientIdentity::parse("host-a").unwrap(), ClientIdentity::parse("host-b").unwrap()];
        let result = MultiStdinserverListener::bind(&dir, &identities).await;
        assert!(result.is_err());

        assert!(!dir.join("host-a").exists());
        let _ = std::fs::remove_dir_all(&blocked_path);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
