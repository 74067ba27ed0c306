//! The `StreamCopier` capability: a data source that drives its own writes
//! into a sink rather than being pulled from by the caller.
//!
//! `StreamConn::send_stream` takes a `StreamCopier` so the source controls
//! its own read sizing and cadence (e.g. a ZFS send pipe choosing its own
//! chunk sizes) while the frame layer stays ignorant of where the bytes
//! originally come from.

use async_trait::async_trait;

use crate::error::StreamCopierError;

/// A source that copies itself into `sink`, reporting which side of the copy
/// failed if it didn't complete cleanly.
#[async_trait]
pub trait StreamCopier: Send {
    async fn write_stream_to(&mut self, sink: &mut (dyn SinkWriter + Send)) -> Result<(), StreamCopierError>;
}

/// The write side a `StreamCopier` pushes bytes into. Implemented by the pipe
/// writer that feeds `StreamConn::send_stream`'s frame-emitting consumer task.
#[async_trait]
pub trait SinkWriter {
    async fn write_chunk(&mut self, data: bytes::Bytes) -> Result<(), StreamCopierError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        received: Vec<bytes::Bytes>,
    }

    #[async_trait]
    impl SinkWriter for RecordingSink {
        async fn write_chunk(&mut self, data: bytes::Bytes) -> Result<(), StreamCopierError> {
            self.received.push(data);
            Ok(())
        }
    }

    struct FixedSource {
        chunks: Vec<bytes::Bytes>,
    }

    #[async_trait]
    impl StreamCopier for FixedSource {
        async fn write_stream_to(&mut self, sink: &mut (dyn SinkWriter + Send)) -> Result<(), StreamCopierError> {
            for chunk in self.chunks.drain(..) {
                sink.write_chunk(chunk).await?;
            }
            Ok(())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl StreamCopier for FailingSource {
        async fn write_stream_to(&mut self, _sink: &mut (dyn SinkWriter + Send)) -> Result<(), StreamCopierError> {
            Err(StreamCopierError::read_error("source exhausted unexpectedly"))
        }
    }

    #[compio::test]
    async fn copier_pushes_chunks_into_sink() {
        let mut source = FixedSource {
            chunks: vec![bytes::Bytes::from_static(b"a"), bytes::Bytes::from_static(b"b")],
        };
        let mut sink = RecordingSink { received: vec![] };
        source.write_stream_to(&mut sink).await.unwrap();
        assert_eq!(sink.received, vec![bytes::Bytes::from_static(b"a"), bytes::Bytes::from_static(b"b")]);
    }

    #[compio::test]
    async fn source_failure_is_reported_as_read_error() {
        let mut source = FailingSource;
        let mut sink = RecordingSink { received: vec![] };
        let err = source.write_stream_to(&mut sink).await.unwrap_err();
        assert!(err.is_read_error);
        assert!(!err.is_write_error);
    }
}
