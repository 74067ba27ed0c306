//! In-process byte pipe with close-with-error semantics.
//!
//! Used to connect a push-based `StreamCopier` source to the frame writer in
//! `send_stream` without having either side block on the other's pace: the
//! producer (the copier) and the consumer (the frame emitter) run as two
//! concurrent tasks joined by this pipe.
//!
//! This plays the role Go's `io.Pipe` + `CloseWithError` plays in the original:
//! a bounded channel of byte chunks in one direction, plus an out-of-band abort
//! cell the consumer can set to unblock a stuck producer.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::PipeError;

struct Shared {
    /// Set by the reader side to tell the writer side to stop producing.
    abort: parking_lot::Mutex<Option<PipeError>>,
}

enum Msg {
    Data(Bytes),
    Eof(Option<PipeError>),
}

pub struct PipeWriter {
    tx: flume::Sender<Msg>,
    shared: Arc<Shared>,
}

pub struct PipeReader {
    rx: flume::Receiver<Msg>,
    shared: Arc<Shared>,
}

/// Create a connected pipe pair with the given channel depth.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let shared = Arc::new(Shared {
        abort: parking_lot::Mutex::new(None),
    });
    (
        PipeWriter {
            tx,
            shared: shared.clone(),
        },
        PipeReader { rx, shared },
    )
}

impl PipeWriter {
    /// Write one chunk. Fails if the reader side has aborted or been dropped.
    pub async fn write(&self, data: Bytes) -> Result<(), PipeError> {
        if let Some(err) = self.shared.abort.lock().clone() {
            return Err(err);
        }
        self.tx
            .send_async(Msg::Data(data))
            .await
            .map_err(|_| PipeError::Closed)
    }

    /// Signal clean end-of-stream; consumes the writer.
    pub async fn close(self) {
        let _ = self.tx.send_async(Msg::Eof(None)).await;
    }

    /// Signal that the source failed; the reader observes this as an error
    /// instead of clean EOF. Consumes the writer.
    pub async fn close_with_error(self, err: PipeError) {
        let _ = self.tx.send_async(Msg::Eof(Some(err))).await;
    }
}

impl PipeReader {
    /// Receive the next chunk.
    ///
    /// `Ok(Some(bytes))` is a data chunk, `Ok(None)` is clean EOF, `Err` is an
    /// error reported by the writer (or implied by the writer vanishing).
    pub async fn recv(&mut self) -> Result<Option<Bytes>, PipeError> {
        match self.rx.recv_async().await {
            Ok(Msg::Data(b)) => Ok(Some(b)),
            Ok(Msg::Eof(None)) => Ok(None),
            Ok(Msg::Eof(Some(e))) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Abort the producer: subsequent (and any in-flight) `PipeWriter::write`
    /// calls will fail with `err`. Used when cancelling a `send_stream` write.
    pub fn abort(&self, err: PipeError) {
        *self.shared.abort.lock() = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn data_then_clean_eof() {
        let (w, mut r) = pipe(4);
        w.write(Bytes::from_static(b"abc")).await.unwrap();
        w.close().await;
        assert_eq!(r.recv().await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert_eq!(r.recv().await.unwrap(), None);
    }

    #[compio::test]
    async fn error_eof_surfaces_to_reader() {
        let (w, mut r) = pipe(4);
        w.write(Bytes::from_static(b"abc")).await.unwrap();
        w.close_with_error(PipeError::aborted("disk read failed")).await;
        assert_eq!(r.recv().await.unwrap(), Some(Bytes::from_static(b"abc")));
        let err = r.recv().await.unwrap_err();
        assert!(matches!(err, PipeError::Aborted(_)));
    }

    #[compio::test]
    async fn reader_abort_unblocks_writer() {
        let (w, r) = pipe(4);
        r.abort(PipeError::aborted("cancelled"));
        let err = w.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, PipeError::Aborted(_)));
    }

    #[compio::test]
    async fn dropped_writer_reads_as_clean_eof() {
        let (w, mut r) = pipe(4);
        drop(w);
        assert_eq!(r.recv().await.unwrap(), None);
    }
}
