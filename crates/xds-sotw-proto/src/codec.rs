//! Length-prefixed protobuf framing over async byte streams.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound on a single frame body (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Write one frame: `u32` big-endian length, then the encoded message.
///
/// # Errors
///
/// Returns error if the message exceeds `max_len` or the write fails.
pub async fn write_frame<W, M>(writer: &mut W, message: &M, max_len: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let len = message.encoded_len();
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }
    let prefix = u32::try_from(len).map_err(|_| FrameError::TooLarge { len, max: max_len })?;

    let mut buf = Vec::with_capacity(4 + len);
    buf.extend_from_slice(&prefix.to_be_bytes());
    message.encode(&mut buf).map_err(|e| FrameError::Encode(e.to_string()))?;

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary.
///
/// # Errors
///
/// Returns error on oversized frames, truncated frames, or undecodable bodies.
pub async fn read_frame<R, M>(reader: &mut R, max_len: usize) -> Result<Option<M>, FrameError>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed inside a frame length prefix",
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    M::decode(body.as_slice())
        .map(Some)
        .map_err(|e| FrameError::Decode(e.to_string()))
}

/// Errors for frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame larger than the configured limit
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Frame length
        len: usize,
        /// Configured limit
        max: usize,
    },
    /// Encoding failed
    #[error("encode failed: {0}")]
    Encode(String),
    /// Decoding failed
    #[error("decode failed: {0}")]
    Decode(String),
    /// Underlying I/O failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
