//! Length-prefixed frames on a WebTransport stream
//!
//! Each frame is a little-endian `u32` byte count followed by that many bytes
//! of JSON. Viewer frames are capped at [`MAX_MESSAGE_SIZE`]; server frames at
//! [`MAX_OUTBOUND_SIZE`] since snapshots grow with the agent count.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::sim::constants::net::{MAX_MESSAGE_SIZE, MAX_OUTBOUND_SIZE};

const PREFIX_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame of {0} bytes exceeds the {1} byte limit")]
    MessageTooLarge(usize, usize),
    #[error("Stream error: {0}")]
    Io(#[from] io::Error),
}

/// A clean EOF anywhere inside a frame means the peer went away
async fn fill<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<(), FramingError> {
    stream.read_exact(buf).await.map(drop).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FramingError::ConnectionClosed,
        _ => FramingError::Io(e),
    })
}

/// Read one viewer frame
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    read_message_limited(stream, MAX_MESSAGE_SIZE).await
}

pub async fn read_message_limited<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, FramingError> {
    let mut prefix = [0u8; PREFIX_LEN];
    fill(stream, &mut prefix).await?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(FramingError::MessageTooLarge(len, max_len));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        fill(stream, &mut payload).await?;
    }
    Ok(payload)
}

/// Write one server frame and flush it
pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<(), FramingError> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|_| data.len() <= MAX_OUTBOUND_SIZE)
        .ok_or(FramingError::MessageTooLarge(data.len(), MAX_OUTBOUND_SIZE))?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + data.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(data);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}
