//! Length-prefixed framing over any async byte stream
//!
//! A frame is a 4-byte big-endian length followed by exactly that many bytes.
//! Control frames carry a UTF-8 JSON document, raw frames carry opaque bytes.
//! The codec enforces no maximum frame size; callers that need a bound read
//! the header with [`read_frame_len`] and decide before pulling the body.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Framing failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer closed the stream cleanly on a frame boundary
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Peer closed the stream in the middle of a frame
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("invalid control frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {0} bytes does not fit a 32-bit length prefix")]
    FrameTooLarge(usize),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Serialize `message` as JSON and send it as one control frame.
pub async fn write_control<W, T>(conn: &mut W, message: &T) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    write_frame(conn, &body).await
}

/// Read one control frame and decode its JSON body.
pub async fn read_control<R, T>(conn: &mut R) -> ProtocolResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = read_frame_len(conn).await?;
    let body = read_raw_body(conn, len).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Send `data` as one raw frame.
pub async fn write_raw<W>(conn: &mut W, data: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(conn, data).await
}

/// Read one raw frame.
pub async fn read_raw<R>(conn: &mut R) -> ProtocolResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let len = read_frame_len(conn).await?;
    read_raw_body(conn, len).await
}

/// Read only the length prefix of the next frame.
///
/// Returns [`ProtocolError::ConnectionClosed`] when the stream ends before the
/// first header byte.
pub async fn read_frame_len<R>(conn: &mut R) -> ProtocolResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let received = fill(conn, &mut header).await?;
    if received == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if received < FRAME_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: FRAME_HEADER_LEN,
            received,
        });
    }
    Ok(u32::from_be_bytes(header) as usize)
}

/// Read a frame body of `len` bytes whose header has already been consumed.
pub async fn read_raw_body<R>(conn: &mut R, len: usize) -> ProtocolResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut body = vec![0u8; len];
    let received = fill(conn, &mut body).await?;
    if received < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            received,
        });
    }
    Ok(Bytes::from(body))
}

/// Discard a frame body of `len` bytes so the stream stays aligned.
pub async fn skip_raw_body<R>(conn: &mut R, len: usize) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut limited = (&mut *conn).take(len as u64);
    let discarded = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if (discarded as usize) < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            received: discarded as usize,
        });
    }
    Ok(())
}

async fn write_frame<W>(conn: &mut W, body: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge(body.len()))?;

    // Header and body go out in one write so a frame is never interleaved.
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    conn.write_all(&frame).await?;
    conn.flush().await?;
    Ok(())
}

/// Read until `buf` is full or the peer closes; returns the bytes received.
async fn fill<R>(conn: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = conn.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
