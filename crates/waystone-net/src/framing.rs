//! Length-prefixed framing for broker TCP streams.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does not include the prefix itself. A zero-length frame is a
//! valid no-op.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::messages::{Envelope, MessageError, deserialize_envelope, serialize_envelope};

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Limits applied to every frame on a broker stream.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted payload, prefix excluded. Default: 64 KiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 65_536,
        }
    }
}

impl FrameConfig {
    fn check(&self, size: u32) -> Result<(), FrameError> {
        if size > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds limit {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    /// The peer closed the stream before a complete frame arrived.
    #[error("stream closed by peer")]
    ConnectionClosed,

    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The frame was complete but did not hold a valid envelope.
    #[error("invalid envelope: {0}")]
    Message(#[from] MessageError),
}

fn closed_or_io(e: std::io::Error) -> FrameError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
        _ => FrameError::Io(e),
    }
}

/// Read one frame's payload. Oversized lengths are rejected before any
/// payload byte is read.
pub async fn read_frame<R>(reader: &mut R, config: &FrameConfig) -> Result<Vec<u8>, FrameError>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    reader.read_exact(&mut prefix).await.map_err(closed_or_io)?;
    let size = u32::from_le_bytes(prefix);
    config.check(size)?;

    let mut payload = vec![0u8; size as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await.map_err(closed_or_io)?;
    }
    Ok(payload)
}

/// Write `payload` behind its length prefix and flush.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError>
where
    W: AsyncWriteExt + Unpin,
{
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    config.check(size)?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&size.to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next envelope, skipping zero-length keepalive frames.
pub async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Envelope, FrameError> {
    loop {
        let frame = read_frame(reader, config).await?;
        if !frame.is_empty() {
            return Ok(deserialize_envelope(&frame)?);
        }
    }
}

pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let bytes = serialize_envelope(envelope)?;
    write_frame(writer, &bytes, config).await
}
