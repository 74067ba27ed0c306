//! `HeartbeatConn`: adds framed liveness on top of `TimeoutConn`.
//!
//! A background task periodically sends a zero-payload heartbeat frame.
//! `recv_frame` transparently swallows heartbeat frames from the peer and
//! resets the peer-silence deadline on every frame received, heartbeat or
//! not; if the peer goes silent for longer than `peer_timeout`, the next
//! `recv_frame` call fails with a timeout.
//!
//! The underlying `TimeoutConn`'s read and write locks stay independent, so
//! the heartbeat sender writing in the background never stalls a concurrent
//! `recv_frame`, and a `send_frame` call only ever contends with the
//! heartbeat sender for the write lock, never the read lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use compio::io::{AsyncRead, AsyncWrite};

use crate::frame::{self, Frame, HEARTBEAT};
use crate::timeoutconn::{TimeoutConn, TimeoutConnConfig};

/// Tunables for the heartbeat layer.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConnConfig {
    /// How often this side sends a heartbeat frame.
    pub send_interval: Duration,
    /// How long to wait for any frame (heartbeat or otherwise) before
    /// `recv_frame` fails with a timeout.
    pub peer_timeout: Duration,
    pub write_timeout: Option<Duration>,
    pub max_frame_length: u32,
}

impl Default for HeartbeatConnConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(30),
            write_timeout: Some(Duration::from_secs(30)),
            max_frame_length: frame::DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

pub struct HeartbeatConn<R, W> {
    conn: Arc<TimeoutConn<R, W>>,
    config: HeartbeatConnConfig,
    closed: Arc<AtomicBool>,
}

impl<R, W> HeartbeatConn<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(read_half: R, write_half: W, config: HeartbeatConnConfig) -> Self {
        let timeout_config = TimeoutConnConfig {
            read_timeout: Some(config.peer_timeout),
            write_timeout: config.write_timeout,
        };
        let conn = Arc::new(TimeoutConn::new(read_half, write_half, timeout_config));
        let closed = Arc::new(AtomicBool::new(false));

        let sender_conn = conn.clone();
        let sender_closed = closed.clone();
        let send_interval = config.send_interval;
        compio::runtime::spawn(async move {
            loop {
                compio::time::sleep(send_interval).await;
                if sender_closed.load(Ordering::Acquire) {
                    return;
                }
                let header = frame::encode_header(HEARTBEAT, 0);
                if sender_conn.write_all(header.to_vec()).await.is_err() {
                    return;
                }
            }
        })
        .detach();

        Self { conn, config, closed }
    }

    /// Send one frame, of any type. Callers building on top of this (see
    /// `crate::streamconn`) are responsible for restricting application-level
    /// calls to public frame types; this layer only handles framing and
    /// liveness, not the stream-multiplexing rules for which types are valid
    /// where.
    pub async fn send_frame(&self, frame_type: u32, payload: Bytes) -> std::io::Result<()> {
        let header = frame::encode_header(frame_type, payload.len() as u32);
        self.conn.write_all(header.to_vec()).await?.0?;
        if !payload.is_empty() {
            self.conn.write_all(payload.to_vec()).await?.0?;
        }
        Ok(())
    }

    /// Receive the next application frame, transparently consuming and
    /// discarding any heartbeat frames in between.
    pub async fn recv_frame(&self) -> std::io::Result<Frame> {
        loop {
            let header_buf = vec![0u8; 8];
            let result = self.conn.read_exact(header_buf).await?;
            result.0?;
            let header: [u8; 8] = result.1.as_slice().try_into().expect("read_exact filled 8 bytes");
            let (frame_type, len) = frame::decode_header(&header);

            if len > self.config.max_frame_length {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame length {len} exceeds configured maximum {}", self.config.max_frame_length),
                ));
            }

            let payload = if len == 0 {
                Bytes::new()
            } else {
                let buf = vec![0u8; len as usize];
                let result = self.conn.read_exact(buf).await?;
                result.0?;
                Bytes::from(result.1)
            };

            if frame_type == HEARTBEAT {
                continue;
            }

            return Ok(Frame::new(frame_type, payload));
        }
    }

    /// Idempotently stop the background heartbeat sender and close the
    /// underlying connection in both directions.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.conn.close().await;
    }

    pub fn config(&self) -> HeartbeatConnConfig {
        self.config
    }
}
