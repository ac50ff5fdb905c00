//! Length-prefixed framing.
//!
//! Frame format: `[length:4][body:N]`
//!
//! - **length**: Body size in bytes (little-endian u32)
//! - **body**: One encoded envelope
//!
//! Framing knows nothing about envelope contents; body encoding belongs to
//! the codec. Zero-length bodies are legal frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size: 4 bytes of little-endian length.
pub const HEADER_LEN: usize = 4;

/// Default cap on a single frame's body (64 MiB).
///
/// A corrupt or hostile length prefix must not make the reader allocate
/// unbounded memory; anything above the cap is rejected before allocation.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Framing error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// The stream closed before a full frame arrived.
    ///
    /// Raised both for closure between frames and mid-frame; either way no
    /// further frame can be read.
    #[error("connection closed before a full frame arrived")]
    ConnectionClosed,

    /// Frame body exceeds the configured cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Body size from the header or the caller.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::ConnectionClosed,
            _ => WireError::Io(err.to_string()),
        }
    }
}

/// Build one frame: the length header followed by `body`.
///
/// # Errors
///
/// Returns [`WireError::FrameTooLarge`] when `body` exceeds `max_len`.
pub fn frame(body: &[u8], max_len: usize) -> Result<Vec<u8>, WireError> {
    if body.len() > max_len {
        return Err(WireError::FrameTooLarge {
            size: body.len(),
            max: max_len,
        });
    }
    let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(body);
    Ok(framed)
}

/// Write one frame and flush.
///
/// The frame is assembled first and written with a single `write_all`, so a
/// caller holding the connection's write lock never leaves a torn frame on
/// the stream between header and body.
///
/// # Errors
///
/// [`WireError::FrameTooLarge`] for oversized bodies, otherwise any stream
/// write/flush failure.
pub async fn write_frame<W>(writer: &mut W, body: &[u8], max_len: usize) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame(body, max_len)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body from the stream.
///
/// Suspends until the 4-byte header and then the full body have accumulated;
/// short reads keep the read suspended rather than failing. The length is
/// validated against `max_len` before the body buffer is allocated.
///
/// # Errors
///
/// [`WireError::ConnectionClosed`] when the stream ends before a full frame
/// (including mid-frame closure), [`WireError::FrameTooLarge`] for an
/// oversized length prefix, [`WireError::Io`] for other stream failures.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
