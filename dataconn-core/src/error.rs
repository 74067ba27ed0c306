//! Low-level error types shared by the timeout, pipe and poison-guard building blocks.
//!
//! Higher layers (`dataconn::heartbeatconn`, `dataconn::streamconn`) define their own,
//! richer error enums and convert these into them at the boundary.

use std::io;
use thiserror::Error;

/// Error surfaced by the in-process [`crate::pipe`] used to bridge a `StreamCopier`
/// source to the heartbeat writer without blocking either side on the other's pace.
#[derive(Error, Debug, Clone)]
pub enum PipeError {
    /// The peer side of the pipe is gone (dropped without an explicit close).
    #[error("pipe closed")]
    Closed,

    /// The reader side closed the pipe with an explicit cause, aborting the writer.
    #[error("pipe aborted: {0}")]
    Aborted(String),
}

impl PipeError {
    #[must_use]
    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        Self::new(io::ErrorKind::BrokenPipe, err)
    }
}
