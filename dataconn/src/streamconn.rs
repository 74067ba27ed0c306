//! `StreamConn`: message and stream multiplexing over a `HeartbeatConn`.
//!
//! Tracks, per direction, whether the connection is still in a well-defined
//! protocol state ("clean") or has been left in an indeterminate state by a
//! failed operation ("poisoned"). A poisoned direction must not be used
//! again — any further reads (if the read direction is poisoned) or writes
//! (if the write direction is poisoned) would desynchronize the peer's view
//! of the frame stream.
//!
//! Each direction's cleanliness flag sits behind its own lock, so read and
//! write operations — and the cleanliness bookkeeping for each — never
//! contend with one another.

use std::sync::Arc;

use async_lock::Mutex;
use bytes::Bytes;
use compio::io::{AsyncRead, AsyncWrite};
use dataconn_core::pipe::{pipe, PipeWriter};
use dataconn_core::{CleanGuard, PipeError};

use crate::error::{DataconnError, ReadStreamError, StreamCopierError};
use crate::frame::{self, END_OF_STREAM, STREAM_ERROR_TRAILER};
use crate::heartbeatconn::{HeartbeatConn, HeartbeatConnConfig};
use crate::streamcopier::{SinkWriter, StreamCopier};

/// Buffer depth of the internal pipe `send_stream` uses to decouple a
/// `StreamCopier`'s own pace from the frame-emitting loop.
const DEFAULT_PIPE_CAPACITY: usize = 4;

pub struct StreamConn<R, W> {
    heartbeat: HeartbeatConn<R, W>,
    read_clean: Mutex<bool>,
    write_clean: Mutex<bool>,
    pipe_capacity: usize,
}

impl<R, W> StreamConn<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(read_half: R, write_half: W, config: HeartbeatConnConfig) -> Self {
        Self {
            heartbeat: HeartbeatConn::new(read_half, write_half, config),
            read_clean: Mutex::new(true),
            write_clean: Mutex::new(true),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Whether the read direction is currently known to be in a well-defined
    /// protocol state. Only meaningful between calls; a guard is held for the
    /// duration of any in-flight read.
    pub async fn is_read_clean(&self) -> bool {
        *self.read_clean.lock().await
    }

    /// Whether the write direction is currently known to be in a well-defined
    /// protocol state.
    pub async fn is_write_clean(&self) -> bool {
        *self.write_clean.lock().await
    }

    /// Read one bounded logical stream of `frame_type`: zero or more data
    /// frames accumulated into a buffer capped at `max_size`, terminated by
    /// `END_OF_STREAM` or a `STREAM_ERROR_TRAILER`.
    ///
    /// Any reserved-type frame other than those two terminators, any data
    /// frame of a different type, or the accumulated payload exceeding
    /// `max_size`, is a framing error and poisons the read direction.
    pub async fn read_message(&self, max_size: usize, frame_type: u32) -> Result<Bytes, ReadStreamError> {
        let mut clean = self.read_clean.lock().await;
        if !*clean {
            return Err(ReadStreamError::unknown_state());
        }
        let guard = CleanGuard::new(&mut clean);

        let mut buf = bytes::BytesMut::new();
        loop {
            let frame = match self.heartbeat.recv_frame().await {
                Ok(frame) => frame,
                Err(e) => return Err(ReadStreamError::conn(e.to_string())),
            };

            if frame.frame_type == END_OF_STREAM {
                guard.disarm();
                return Ok(buf.freeze());
            }

            if frame.frame_type == STREAM_ERROR_TRAILER {
                return match frame::decode_stream_error_trailer(&frame.payload) {
                    Some((kind, message)) => {
                        guard.disarm();
                        Err(ReadStreamError::source(format!("{kind}: {message}")))
                    }
                    None => {
                        guard.disarm();
                        Err(ReadStreamError::trailer_encoding("malformed stream error trailer"))
                    }
                };
            }

            if frame.frame_type != frame_type {
                return Err(ReadStreamError::conn(format!(
                    "unexpected frame type {} while reading message of type {frame_type}",
                    frame.frame_type
                )));
            }

            if buf.len() + frame.payload.len() > max_size {
                return Err(ReadStreamError::conn(format!("message exceeds max_size of {max_size} bytes")));
            }

            buf.extend_from_slice(&frame.payload);
        }
    }

    /// Read one unbounded logical stream of `frame_type`, forwarding each
    /// chunk into `sink` as it arrives, until the peer sends `END_OF_STREAM`
    /// (clean) or `STREAM_ERROR_TRAILER` (the peer's source failed).
    pub async fn read_stream_into(&self, sink: &mut PipeWriter, frame_type: u32) -> Result<(), ReadStreamError> {
        let mut clean = self.read_clean.lock().await;
        if !*clean {
            return Err(ReadStreamError::unknown_state());
        }
        let guard = CleanGuard::new(&mut clean);

        loop {
            let frame = match self.heartbeat.recv_frame().await {
                Ok(frame) => frame,
                Err(e) => return Err(ReadStreamError::conn(e.to_string())),
            };

            if frame.frame_type == END_OF_STREAM {
                guard.disarm();
                return Ok(());
            }

            if frame.frame_type == STREAM_ERROR_TRAILER {
                return match frame::decode_stream_error_trailer(&frame.payload) {
                    Some((kind, message)) => {
                        guard.disarm();
                        Err(ReadStreamError::source(format!("{kind}: {message}")))
                    }
                    None => {
                        guard.disarm();
                        Err(ReadStreamError::trailer_encoding("malformed stream error trailer"))
                    }
                };
            }

            if frame.frame_type != frame_type {
                return Err(ReadStreamError::conn(format!(
                    "unexpected frame type {} mid-stream of type {frame_type}",
                    frame.frame_type
                )));
            }

            if sink.write(frame.payload).await.is_err() {
                // The consumer went away. The wire is still mid-stream (more
                // frames may follow that nobody will read), so the read
                // direction stays poisoned.
                return Err(ReadStreamError::conn("stream sink closed before end of stream"));
            }
        }
    }

    /// Write one bounded application message: splits `payload` into
    /// `frame_type` data frames no larger than the configured maximum frame
    /// length, then terminates with `END_OF_STREAM`.
    pub async fn write_message(&self, frame_type: u32, payload: Bytes) -> Result<(), DataconnError> {
        if !frame::is_public_frame_type(frame_type) {
            return Err(DataconnError::protocol("frame_type must be a public frame type"));
        }
        let mut clean = self.write_clean.lock().await;
        if !*clean {
            return Err(DataconnError::UnknownState);
        }
        let guard = CleanGuard::new(&mut clean);

        let max_frame = (self.heartbeat.config().max_frame_length as usize).max(1);
        let mut remaining = payload;
        while !remaining.is_empty() {
            let chunk_len = remaining.len().min(max_frame);
            let chunk = remaining.split_to(chunk_len);
            self.heartbeat.send_frame(frame_type, chunk).await?;
        }
        self.heartbeat.send_frame(END_OF_STREAM, Bytes::new()).await?;
        guard.disarm();
        Ok(())
    }

    /// Send one logical stream, pulled from `copier`, as a sequence of frames
    /// of `frame_type` terminated by `END_OF_STREAM`, or by
    /// `STREAM_ERROR_TRAILER` if the copier reports that its source failed.
    ///
    /// A source-reported failure does not poison the write direction (a
    /// well-formed trailer was sent and the peer saw it); any other failure
    /// to write (a transport error partway through) does.
    pub async fn send_stream<C>(&self, frame_type: u32, mut copier: C) -> Result<(), DataconnError>
    where
        C: StreamCopier + Send + 'static,
    {
        if !frame::is_public_frame_type(frame_type) {
            return Err(DataconnError::protocol("frame_type must be a public frame type"));
        }
        let mut clean = self.write_clean.lock().await;
        if !*clean {
            return Err(DataconnError::UnknownState);
        }
        let guard = CleanGuard::new(&mut clean);

        let (pipe_writer, mut pipe_reader) = pipe(self.pipe_capacity);
        let producer = compio::runtime::spawn(async move {
            let mut sink = PipeSink(pipe_writer);
            let result = copier.write_stream_to(&mut sink).await;
            match &result {
                Ok(()) => sink.0.close().await,
                Err(e) => sink.0.close_with_error(PipeError::aborted(e.cause.clone())).await,
            }
            result
        });

        loop {
            match pipe_reader.recv().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = self.heartbeat.send_frame(frame_type, chunk).await {
                        // The wire failed, not the source. Abort the pipe so a
                        // producer blocked on a full channel wakes up instead of
                        // being left to run (and possibly block forever) after
                        // we stop polling it.
                        pipe_reader.abort(PipeError::aborted(e.to_string()));
                        let _ = producer.await;
                        return Err(DataconnError::from(e));
                    }
                }
                Ok(None) => {
                    if let Err(e) = self.heartbeat.send_frame(END_OF_STREAM, Bytes::new()).await {
                        pipe_reader.abort(PipeError::aborted(e.to_string()));
                        let _ = producer.await;
                        return Err(DataconnError::from(e));
                    }
                    guard.disarm();
                    let _ = producer.await;
                    return Ok(());
                }
                Err(_) => {
                    // The producer closed the pipe with an error. Join it to
                    // recover the actual `StreamCopierError` rather than the
                    // string that crossed the pipe, so a declared source
                    // failure can be told apart from the copier failing to
                    // write into our own sink.
                    let copier_err = match producer.await {
                        Ok(Err(e)) => e,
                        _ => StreamCopierError::read_error("stream copier task failed"),
                    };

                    if copier_err.is_write_error {
                        // The copier failed pushing into our pipe, not at its
                        // own source: there is nothing well-formed to declare
                        // to the peer, so this poisons the write direction
                        // rather than sending a trailer.
                        return Err(DataconnError::protocol(format!(
                            "stream copier failed writing to sink: {}",
                            copier_err.cause
                        )));
                    }

                    let trailer = frame::encode_stream_error_trailer("source", &copier_err.cause);
                    self.heartbeat.send_frame(STREAM_ERROR_TRAILER, trailer).await?;
                    guard.disarm();
                    return Err(DataconnError::protocol(format!("stream source failed: {}", copier_err.cause)));
                }
            }
        }
    }

    /// Send one logical stream directly from an async reader, with no
    /// intermediate pipe: reads `chunk_size`-sized chunks and emits each as a
    /// frame until EOF, then sends `END_OF_STREAM`.
    pub async fn send_stream_from_reader<Rd>(
        &self,
        frame_type: u32,
        mut reader: Rd,
        chunk_size: usize,
    ) -> Result<(), DataconnError>
    where
        Rd: AsyncRead + Unpin + Send,
    {
        if !frame::is_public_frame_type(frame_type) {
            return Err(DataconnError::protocol("frame_type must be a public frame type"));
        }
        let mut clean = self.write_clean.lock().await;
        if !*clean {
            return Err(DataconnError::UnknownState);
        }
        let guard = CleanGuard::new(&mut clean);

        loop {
            let buf = vec![0u8; chunk_size];
            let result = reader.read(buf).await;
            match result.0 {
                Ok(0) => {
                    self.heartbeat.send_frame(END_OF_STREAM, Bytes::new()).await?;
                    guard.disarm();
                    return Ok(());
                }
                Ok(n) => {
                    let chunk = Bytes::from(result.1).slice(0..n);
                    self.heartbeat.send_frame(frame_type, chunk).await?;
                }
                Err(e) => {
                    let trailer = frame::encode_stream_error_trailer("source", &e.to_string());
                    self.heartbeat.send_frame(STREAM_ERROR_TRAILER, trailer).await?;
                    guard.disarm();
                    return Err(DataconnError::protocol(format!("stream source read failed: {e}")));
                }
            }
        }
    }

    /// Poison both directions and close the underlying connection. A
    /// subsequent `read_message`/`read_stream_into`/`write_message`/
    /// `send_stream` call observes its direction as no longer clean and is
    /// rejected with `UnknownState` rather than touching the wire.
    pub async fn close(&self) {
        *self.read_clean.lock().await = false;
        *self.write_clean.lock().await = false;
        self.heartbeat.close().await;
    }
}

struct PipeSink(PipeWriter);

#[async_trait::async_trait]
impl SinkWriter for PipeSink {
    async fn write_chunk(&mut self, data: Bytes) -> Result<(), StreamCopierError> {
        self.0
            .write(data)
            .await
            .map_err(|e| StreamCopierError::write_error(e.to_string()))
    }
}
