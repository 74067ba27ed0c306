//! `TimeoutConn`: a duplex connection, already split into independent read and
//! write halves, with a per-direction deadline applied to every operation.
//!
//! Each half is held behind its own lock, never one lock shared across both
//! directions: a read in progress holds only the read half's lock, so a
//! concurrent write is never blocked behind it, and vice versa. This is the
//! independence the stream layer above this one relies on (it serializes
//! multiple writers — the heartbeat sender and the caller — through the same
//! write lock, but that serialization never touches the read side).

use async_lock::Mutex;
use compio::buf::{IoBuf, IoBufMut};
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::transport::{CloseWrite, RawHandle};
use dataconn_core::timeout::{read_exact_with_timeout, read_with_timeout, write_all_with_timeout, write_with_timeout};

/// Per-direction deadlines applied to every `TimeoutConn` operation.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConnConfig {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for TimeoutConnConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// A duplex connection whose read half `R` and write half `W` are locked
/// independently of one another, each bound to the deadlines in `config`.
pub struct TimeoutConn<R, W> {
    read_half: Mutex<R>,
    write_half: Mutex<W>,
    config: TimeoutConnConfig,
    closed: AtomicBool,
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

impl<R, W> TimeoutConn<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(read_half: R, write_half: W, config: TimeoutConnConfig) -> Self {
        Self {
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> TimeoutConnConfig {
        self.config
    }

    /// Read into `buf`, bound by `read_timeout`. Returns the (possibly short) read.
    pub async fn read<B: IoBufMut>(&self, buf: B) -> io::Result<compio::buf::BufResult<usize, B>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let mut guard = self.read_half.lock().await;
        read_with_timeout(&mut *guard, buf, self.config.read_timeout).await
    }

    /// Read until `buf` is filled or the deadline elapses.
    pub async fn read_exact<B: IoBufMut>(&self, buf: B) -> io::Result<compio::buf::BufResult<(), B>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let mut guard = self.read_half.lock().await;
        read_exact_with_timeout(&mut *guard, buf, self.config.read_timeout).await
    }

    /// Write `buf`, bound by `write_timeout`. Returns the (possibly short) write.
    pub async fn write<B: IoBuf>(&self, buf: B) -> io::Result<compio::buf::BufResult<usize, B>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let mut guard = self.write_half.lock().await;
        write_with_timeout(&mut *guard, buf, self.config.write_timeout).await
    }

    /// Write the whole buffer, bound by `write_timeout`.
    pub async fn write_all<B: IoBuf>(&self, buf: B) -> io::Result<compio::buf::BufResult<(), B>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let mut guard = self.write_half.lock().await;
        write_all_with_timeout(&mut *guard, buf, self.config.write_timeout).await
    }

    /// Abort both directions: latches the connection closed so every
    /// subsequent `read`/`write` call fails immediately without touching
    /// either half again, and best-effort shuts down the write half so the
    /// peer observes the connection going away rather than just going quiet.
    ///
    /// Idempotent: closing an already-closed connection is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = self.write_half.lock().await;
        let _ = guard.close().await;
    }

    pub fn into_halves(self) -> (R, W) {
        (self.read_half.into_inner(), self.write_half.into_inner())
    }
}

impl<R, W> TimeoutConn<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + CloseWrite,
{
    /// Half-close the write direction, leaving reads unaffected.
    pub async fn close_write(&self) -> io::Result<()> {
        let mut guard = self.write_half.lock().await;
        guard.close_write().await
    }
}

impl<R, W> TimeoutConn<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + RawHandle,
{
    /// The underlying OS handle of the write half, when the transport exposes one.
    ///
    /// Mirrors the original's optional `net.Conn` capability probe: callers use
    /// this to apply OS-level tuning (e.g. socket buffer sizes) that has no
    /// portable async API.
    pub async fn raw_handle(&self) -> Option<std::os::fd::RawFd> {
        self.write_half.lock().await.raw_fd()
    }
}
