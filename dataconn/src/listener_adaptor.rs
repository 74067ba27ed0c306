//! Adapts a fallible [`AuthenticatedListener::accept`] into an infallible
//! `accept()` that retries transient failures forever and only ever hands
//! the caller a connection, never an error.
//!
//! Grounded in the original's `authlistener` -> `net.Listener` adaptor: a
//! background task calls the underlying listener's `accept` in a loop,
//! logging and discarding failures, and forwards successes down a channel
//! that the adaptor's own `accept()` simply waits on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transport::{AuthConn, AuthenticatedListener, Wire};

/// Wraps an `AuthenticatedListener` so that transient accept failures never
/// propagate to the caller: they're logged and the underlying listener is
/// retried.
pub struct ListenerAdaptor<L: AuthenticatedListener + 'static> {
    rx: flume::Receiver<AuthConn<L::Conn>>,
    listener: Arc<L>,
    closed: Arc<AtomicBool>,
}

impl<L: AuthenticatedListener + 'static> ListenerAdaptor<L> {
    pub fn new(listener: L) -> Self {
        let listener = Arc::new(listener);
        let (tx, rx) = flume::bounded(1);
        let closed = Arc::new(AtomicBool::new(false));

        let bg_listener = listener.clone();
        let bg_closed = closed.clone();
        compio::runtime::spawn(async move {
            loop {
                if bg_closed.load(Ordering::Acquire) {
                    return;
                }
                match bg_listener.accept().await {
                    Ok(conn) => {
                        if bg_closed.load(Ordering::Acquire) {
                            return;
                        }
                        tracing::debug!(addr = %bg_listener.addr(), "accepted connection");
                        if tx.send_async(conn).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        if bg_closed.load(Ordering::Acquire) {
                            return;
                        }
                        tracing::error!(addr = %bg_listener.addr(), error = %e, "accept failed, retrying");
                    }
                }
            }
        })
        .detach();

        Self { rx, listener, closed }
    }

    /// Wait for the next connection. Never returns an error: transient
    /// failures from the underlying listener are retried internally.
    pub async fn accept(&self) -> AuthConn<L::Conn> {
        // The background task only stops after the underlying listener is
        // closed out from under it, at which point there is nothing left to
        // hand back; waiting forever here mirrors that there is no further
        // progress to report.
        match self.rx.recv_async().await {
            Ok(conn) => conn,
            Err(_) => std::future::pending().await,
        }
    }

    pub fn addr(&self) -> String {
        self.listener.addr()
    }

    /// Stop the background accept-retry task and close the underlying
    /// listener. Idempotent.
    pub async fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::Release);
        self.listener.close().await
    }
}
