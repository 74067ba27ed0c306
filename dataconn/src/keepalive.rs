//! `KeepaliveReadCloser`: latches a timeout on an otherwise-blocking reader.
//!
//! Used to bound long-running ZFS send pipes that may stop producing data
//! without ever returning an error or EOF on their own. A background timer
//! watches a shared `last_read_complete` timestamp; if no read has finished
//! within the configured window, it latches `timed_out` and wakes any
//! in-flight caller. A dedicated worker task owns the underlying reader and
//! drains it into a fixed back-buffer on the caller's behalf: that buffer
//! doubles as the read-serialization point, and it keeps draining even after
//! the caller has given up on it, so the producer on the other end of the
//! pipe is never left blocked on a write nobody will read again.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex as AsyncMutex;
use compio::buf::BufResult;
use compio::io::AsyncRead;

/// Tunables for [`KeepaliveReadCloser`].
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Maximum idle time between completed reads before the reader latches timed out.
    pub timeout: Duration,
    /// Size of the fixed back-buffer; caller reads larger than this are capped to it.
    pub back_buffer_size: usize,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            back_buffer_size: 64 * 1024,
        }
    }
}

struct Shared {
    start: Instant,
    last_read_complete_nanos: AtomicU64,
    timed_out: AtomicBool,
}

impl Shared {
    fn touch(&self) {
        let now = self.start.elapsed().as_nanos() as u64;
        self.last_read_complete_nanos.store(now, Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_read_complete_nanos.load(Ordering::Acquire);
        let now = self.start.elapsed().as_nanos() as u64;
        Duration::from_nanos(now.saturating_sub(last))
    }
}

fn keepalive_timeout_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        "keepalive reader timed out: no read completed within the configured window",
    )
}

/// Wraps a blocking/streaming reader so that read inactivity turns into a
/// latched, terminal timeout instead of an indefinite stall.
///
/// `R` is owned by a dedicated worker task for the wrapper's lifetime; callers
/// only ever interact with the back-buffer and the two signaling channels.
pub struct KeepaliveReadCloser {
    shared: Arc<Shared>,
    serialize: AsyncMutex<()>,
    back_buffer: Arc<parking_lot::Mutex<Vec<u8>>>,
    request_tx: flume::Sender<usize>,
    response_rx: flume::Receiver<io::Result<usize>>,
    timeout_rx: flume::Receiver<()>,
    cancel: Arc<AtomicBool>,
    config: KeepaliveConfig,
}

impl KeepaliveReadCloser {
    /// Wrap `reader`, moving it onto a dedicated worker task, and start the
    /// idle-timeout watchdog.
    pub fn new<R>(reader: R, config: KeepaliveConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            start: Instant::now(),
            last_read_complete_nanos: AtomicU64::new(0),
            timed_out: AtomicBool::new(false),
        });
        let back_buffer = Arc::new(parking_lot::Mutex::new(vec![0u8; config.back_buffer_size.max(1)]));
        let cancel = Arc::new(AtomicBool::new(false));

        let (request_tx, request_rx) = flume::bounded::<usize>(1);
        let (response_tx, response_rx) = flume::bounded::<io::Result<usize>>(1);
        let (timeout_tx, timeout_rx) = flume::bounded::<()>(1);

        spawn_read_worker(reader, shared.clone(), back_buffer.clone(), request_rx, response_tx);
        spawn_timer(shared.clone(), config.timeout, timeout_tx, cancel.clone());

        Self {
            shared,
            serialize: AsyncMutex::new(()),
            back_buffer,
            request_tx,
            response_rx,
            timeout_rx,
            cancel,
            config,
        }
    }

    /// Read into `buf`, capped at the configured back-buffer size.
    ///
    /// Returns the (possibly short) read and the buffer back, mirroring the
    /// rest of this crate's `compio`-flavored read signatures.
    pub async fn read(&self, mut buf: Vec<u8>) -> BufResult<usize, Vec<u8>> {
        if self.shared.timed_out.load(Ordering::Acquire) {
            return BufResult(Err(keepalive_timeout_error()), buf);
        }

        let _guard = self.serialize.lock().await;

        if self.shared.timed_out.load(Ordering::Acquire) {
            return BufResult(Err(keepalive_timeout_error()), buf);
        }

        let want = buf.len().min(self.config.back_buffer_size);
        if self.request_tx.send_async(want).await.is_err() {
            return BufResult(Err(io::Error::new(io::ErrorKind::BrokenPipe, "keepalive read worker is gone")), buf);
        }

        let completion = Box::pin(self.response_rx.recv_async());
        let timeout_signal = Box::pin(self.timeout_rx.recv_async());

        match futures::future::select(completion, timeout_signal).await {
            futures::future::Either::Left((Ok(Ok(n)), _)) => {
                let data = self.back_buffer.lock();
                buf[..n].copy_from_slice(&data[..n]);
                BufResult(Ok(n), buf)
            }
            futures::future::Either::Left((Ok(Err(e)), _)) => BufResult(Err(e), buf),
            futures::future::Either::Left((Err(_), _)) => {
                BufResult(Err(io::Error::new(io::ErrorKind::BrokenPipe, "keepalive read worker is gone")), buf)
            }
            // The in-flight worker read is left running; its result, once it
            // lands, is dropped unread because no further read() will ever
            // await this channel again (timed_out is now latched).
            futures::future::Either::Right(_) => BufResult(Err(keepalive_timeout_error()), buf),
        }
    }

    /// Whether this reader has latched a timeout.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::Acquire)
    }

    /// Cancel the watchdog and report closing. If the reader had already
    /// timed out, that error takes precedence over a clean close.
    pub fn close(&self) -> io::Result<()> {
        self.cancel.store(true, Ordering::Release);
        if self.shared.timed_out.load(Ordering::Acquire) {
            return Err(keepalive_timeout_error());
        }
        Ok(())
    }
}

/// Capability probe: tests whether `r` is a [`KeepaliveReadCloser`] and, if
/// so, whether it has latched a timeout. Returns `(is_keepalive, timed_out)`.
#[must_use]
pub fn did_time_out(r: &dyn std::any::Any) -> (bool, bool) {
    match r.downcast_ref::<KeepaliveReadCloser>() {
        Some(k) => (true, k.timed_out()),
        None => (false, false),
    }
}

fn spawn_read_worker<R>(
    mut reader: R,
    shared: Arc<Shared>,
    back_buffer: Arc<parking_lot::Mutex<Vec<u8>>>,
    request_rx: flume::Receiver<usize>,
    response_tx: flume::Sender<io::Result<usize>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    compio::runtime::spawn(async move {
        while let Ok(want) = request_rx.recv_async().await {
            let local = vec![0u8; want];
            let BufResult(result, local) = reader.read(local).await;
            match result {
                Ok(n) => {
                    {
                        let mut bb = back_buffer.lock();
                        bb[..n].copy_from_slice(&local[..n]);
                    }
                    shared.touch();
                    if response_tx.send_async(Ok(n)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if response_tx.send_async(Err(e)).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
    .detach();
}

fn spawn_timer(shared: Arc<Shared>, timeout: Duration, timeout_tx: flume::Sender<()>, cancel: Arc<AtomicBool>) {
    compio::runtime::spawn(async move {
        loop {
            compio::time::sleep(timeout).await;
            if cancel.load(Ordering::Acquire) || shared.timed_out.load(Ordering::Acquire) {
                return;
            }
            if shared.idle_for() >= timeout {
                shared.timed_out.store(true, Ordering::Release);
                let _ = timeout_tx.send_async(()).await;
                return;
            }
        }
    })
    .detach();
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::io::AsyncWriteExt;
    use compio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connect_res, accept_res) = futures::join!(connect, accept);
        (connect_res.unwrap(), accept_res.unwrap().0)
    }

    #[compio::test]
    async fn reads_through_while_source_is_live() {
        let (mut client, server) = loopback_pair().await;
        client.write_all(b"hello".to_vec()).await.0.unwrap();

        let keepalive = KeepaliveReadCloser::new(
            server,
            KeepaliveConfig {
                timeout: Duration::from_secs(5),
                back_buffer_size: 64,
            },
        );
        let BufResult(result, buf) = keepalive.read(vec![0u8; 5]).await;
        let n = result.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(!keepalive.timed_out());
    }

    #[compio::test]
    async fn latches_timeout_when_source_goes_silent() {
        let (_client, server) = loopback_pair().await;
        let keepalive = KeepaliveReadCloser::new(
            server,
            KeepaliveConfig {
                timeout: Duration::from_millis(80),
                back_buffer_size: 64,
            },
        );

        let BufResult(result, _buf) = keepalive.read(vec![0u8; 64]).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(keepalive.timed_out());

        // Latched: every subsequent read fails immediately without doing I/O.
        let BufResult(result2, _buf2) = keepalive.read(vec![0u8; 64]).await;
        assert_eq!(result2.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[compio::test]
    async fn close_after_timeout_returns_timeout_error() {
        let (_client, server) = loopback_pair().await;
        let keepalive = KeepaliveReadCloser::new(
            server,
            KeepaliveConfig {
                timeout: Duration::from_millis(50),
                back_buffer_size: 64,
            },
        );
        let BufResult(result, _buf) = keepalive.read(vec![0u8; 16]).await;
        assert!(result.is_err());
        let err = keepalive.close().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[compio::test]
    async fn did_time_out_probe_reports_latched_state() {
        let (_client, server) = loopback_pair().await;
        let keepalive = KeepaliveReadCloser::new(
            server,
            KeepaliveConfig {
                timeout: Duration::from_millis(50),
                back_buffer_size: 64,
            },
        );
        let _ = keepalive.read(vec![0u8; 16]).await;
        let any_ref: &dyn std::any::Any = &keepalive;
        assert_eq!(did_time_out(any_ref), (true, true));

        struct NotKeepalive;
        let other = NotKeepalive;
        let other_ref: &dyn std::any::Any = &other;
        assert_eq!(did_time_out(other_ref), (false, false));
    }
}
