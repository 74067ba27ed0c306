//! Wire frame format for the heartbeat layer.
//!
//! Each frame is a 4-byte big-endian type tag, a 4-byte big-endian payload
//! length, and that many bytes of payload. Frame types are split into a
//! reserved/control range (used internally by the heartbeat and stream
//! layers) and a public/application range that callers of `StreamConn` use
//! for their own `frame_type` values.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Control frame: proves liveness, carries no payload, never surfaced to callers.
pub const HEARTBEAT: u32 = 0;

/// Control frame: terminates a logical stream successfully.
pub const END_OF_STREAM: u32 = 1;

/// Control frame: terminates a logical stream with a sender-declared error.
/// Payload: length-prefixed UTF-8 `kind` followed by length-prefixed UTF-8 `message`.
pub const STREAM_ERROR_TRAILER: u32 = 2;

/// Frame types below this value are reserved for the protocol itself.
/// Application code must never construct a frame with `frame_type < PUBLIC_FRAME_TYPE_MIN`.
pub const PUBLIC_FRAME_TYPE_MIN: u32 = 16;

/// Default cap on a single frame's payload length (64 KiB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 1 << 16;

/// `true` for any frame type application code is allowed to emit.
#[must_use]
pub const fn is_public_frame_type(t: u32) -> bool {
    t >= PUBLIC_FRAME_TYPE_MIN
}

/// A single decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: u32,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(frame_type: u32, payload: Bytes) -> Self {
        Self { frame_type, payload }
    }

    #[must_use]
    pub const fn is_public(&self) -> bool {
        is_public_frame_type(self.frame_type)
    }

    /// Encode the 8-byte header (type + length) for this frame.
    #[must_use]
    pub fn encode_header(&self) -> [u8; 8] {
        encode_header(self.frame_type, self.payload.len() as u32)
    }
}

#[must_use]
pub fn encode_header(frame_type: u32, len: u32) -> [u8; 8] {
    let mut hdr = [0u8; 8];
    let mut buf = &mut hdr[..];
    buf.put_u32(frame_type);
    buf.put_u32(len);
    hdr
}

/// Decode an 8-byte header into `(frame_type, payload_len)`.
#[must_use]
pub fn decode_header(hdr: &[u8; 8]) -> (u32, u32) {
    let mut buf = &hdr[..];
    let frame_type = buf.get_u32();
    let len = buf.get_u32();
    (frame_type, len)
}

/// Build a stream-error trailer payload from a kind string and a message.
#[must_use]
pub fn encode_stream_error_trailer(kind: &str, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + kind.len() + message.len());
    buf.put_u32(kind.len() as u32);
    buf.extend_from_slice(kind.as_bytes());
    buf.put_u32(message.len() as u32);
    buf.extend_from_slice(message.as_bytes());
    buf.freeze()
}

/// Parse a stream-error trailer payload back into `(kind, message)`.
///
/// Returns `None` if the payload is malformed (too short, or length prefixes
/// that don't fit the remaining bytes) — callers surface this as
/// `ReadStreamErrorKind::StreamErrTrailerEncoding`, not a connection-level error.
#[must_use]
pub fn decode_stream_error_trailer(payload: &[u8]) -> Option<(String, String)> {
    let mut buf = payload;
    if buf.len() < 4 {
        return None;
    }
    let kind_len = buf.get_u32() as usize;
    if buf.len() < kind_len {
        return None;
    }
    let kind = std::str::from_utf8(&buf[..kind_len]).ok()?.to_owned();
    buf.advance(kind_len);

    if buf.len() < 4 {
        return None;
    }
    let msg_len = buf.get_u32() as usize;
    if buf.len() < msg_len {
        return None;
    }
    let message = std::str::from_utf8(&buf[..msg_len]).ok()?.to_owned();

    Some((kind, message))
}
