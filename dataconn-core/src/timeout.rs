//! Timeout helpers for async read/write operations, used to give `TimeoutConn`
//! its per-call deadlines on top of any `compio` duplex stream.

use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::time::timeout;
use std::io;
use std::time::Duration;

/// Execute a read with an optional per-call deadline.
///
/// * `None` blocks indefinitely.
/// * `Some(duration)` fails with `io::ErrorKind::TimedOut` if the read has not
///   completed within `duration`.
pub async fn read_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<usize, B>>
where
    S: AsyncRead + Unpin,
    B: compio::buf::IoBufMut,
{
    match duration {
        None => Ok(stream.read(buf).await),
        Some(d) => match timeout(d, stream.read(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        },
    }
}

/// Execute a write with an optional per-call deadline. See [`read_with_timeout`].
pub async fn write_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<usize, B>>
where
    S: AsyncWrite + Unpin,
    B: compio::buf::IoBuf,
{
    match duration {
        None => Ok(stream.write(buf).await),
        Some(d) => match timeout(d, stream.write(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        },
    }
}

/// Read exactly `buf.len()` bytes, subject to an optional deadline for the whole call.
pub async fn read_exact_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<(), B>>
where
    S: AsyncRead + Unpin,
    B: compio::buf::IoBufMut,
{
    match duration {
        None => Ok(stream.read_exact(buf).await),
        Some(d) => match timeout(d, stream.read_exact(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        },
    }
}

/// Write the whole buffer, subject to an optional deadline for the whole call.
pub async fn write_all_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<(), B>>
where
    S: AsyncWrite + Unpin,
    B: compio::buf::IoBuf,
{
    match duration {
        None => Ok(stream.write_all(buf).await),
        Some(d) => match timeout(d, stream.write_all(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        },
    }
}
