//! Crate-wide error types for the dataconn protocol stack.

use std::io;
use thiserror::Error;

/// Errors produced by the timeout/heartbeat/stream layers that aren't specific
/// to a single read or write direction (connection setup, configuration).
#[derive(Error, Debug)]
pub enum DataconnError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("connection timed out: {0}")]
    Timeout(String),

    #[error("peer did not send any frame within the configured timeout")]
    PeerTimeout,

    #[error("protocol framing error: {0}")]
    Protocol(String),

    #[error("connection is in unknown state (a previous operation on this direction left it poisoned)")]
    UnknownState,

    #[error("invalid client identity {0:?}: {1}")]
    InvalidClientIdentity(String, String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DataconnError {
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Discriminant for [`ReadStreamError`], matching §7's error taxonomy.
///
/// `Conn` is the only variant that poisons the read direction; the others are
/// well-formed protocol events the sender declared explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStreamErrorKind {
    /// Transport failure, framing anomaly, or peer timeout.
    Conn,
    /// The sender reported its own data source failed (stream-error trailer).
    Source,
    /// The sender attempted a stream-error trailer but it was malformed.
    StreamErrTrailerEncoding,
    /// Any other structured failure not covered above.
    Other,
}

impl ReadStreamErrorKind {
    /// Whether a read completing with this kind leaves the read direction clean.
    #[must_use]
    pub const fn leaves_connection_clean(self) -> bool {
        matches!(self, Self::Source | Self::StreamErrTrailerEncoding)
    }
}

/// A structured read failure from `read_message` / `read_stream_into`.
#[derive(Error, Debug)]
#[error("read stream error ({kind:?}): {message}")]
pub struct ReadStreamError {
    pub kind: ReadStreamErrorKind,
    pub message: String,
}

impl ReadStreamError {
    #[must_use]
    pub fn new(kind: ReadStreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conn(message: impl Into<String>) -> Self {
        Self::new(ReadStreamErrorKind::Conn, message)
    }

    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::new(ReadStreamErrorKind::Source, message)
    }

    #[must_use]
    pub fn trailer_encoding(message: impl Into<String>) -> Self {
        Self::new(ReadStreamErrorKind::StreamErrTrailerEncoding, message)
    }

    /// A read was attempted on a direction that was already poisoned by a
    /// prior operation. Distinct from `Conn`: nothing was observed on the
    /// wire this call, there was simply nothing clean left to read.
    #[must_use]
    pub fn unknown_state() -> Self {
        Self::new(ReadStreamErrorKind::Other, DataconnError::UnknownState.to_string())
    }
}

/// Structured outcome of a [`crate::streamcopier::StreamCopier`], distinguishing
/// a failure on the copier's own data source from a failure writing into the sink.
#[derive(Error, Debug, Clone)]
#[error("stream copier error (read={is_read_error}, write={is_write_error}): {cause}")]
pub struct StreamCopierError {
    pub is_read_error: bool,
    pub is_write_error: bool,
    pub cause: String,
}

impl StreamCopierError {
    #[must_use]
    pub fn read_error(cause: impl Into<String>) -> Self {
        Self {
            is_read_error: true,
            is_write_error: false,
            cause: cause.into(),
        }
    }

    #[must_use]
    pub fn write_error(cause: impl Into<String>) -> Self {
        Self {
            is_read_error: false,
            is_write_error: true,
            cause: cause.into(),
        }
    }
}
