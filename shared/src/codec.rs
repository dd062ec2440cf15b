//! Schema-versioned encoding for both channels.
//!
//! Every payload starts with [`SCHEMA_VERSION`] followed by the bincode
//! encoding of a [`Packet`]. On the reliable stream each payload is framed:
//!
//! ```text
//! +-------------------+------------------------------+
//! | length (4 bytes)  | schema byte | bincode packet |
//! | u32 little-endian |                              |
//! +-------------------+------------------------------+
//! ```
//!
//! Datagrams carry the payload without a length prefix. Decoding rejects a
//! packet whose kind is not pinned to the channel it arrived on.

use crate::{Channel, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const SCHEMA_VERSION: u8 = 1;
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported schema version {0}")]
    SchemaVersion(u8),

    #[error("empty payload")]
    Empty,

    #[error("{kind} is not allowed on the {channel:?} channel")]
    WrongChannel { kind: &'static str, channel: Channel },

    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_channel(packet: &Packet, channel: Channel) -> Result<(), CodecError> {
    if packet.channel() != channel {
        return Err(CodecError::WrongChannel {
            kind: packet.kind(),
            channel,
        });
    }
    Ok(())
}

pub fn encode(packet: &Packet, channel: Channel) -> Result<Vec<u8>, CodecError> {
    check_channel(packet, channel)?;

    let body = bincode::serialize(packet)?;
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(SCHEMA_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub fn decode(bytes: &[u8], channel: Channel) -> Result<Packet, CodecError> {
    let (&version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    if version != SCHEMA_VERSION {
        return Err(CodecError::SchemaVersion(version));
    }

    let packet: Packet = bincode::deserialize(body)?;
    check_channel(&packet, channel)?;
    Ok(packet)
}

pub fn encode_datagram(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let bytes = encode(packet, Channel::Unreliable)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

pub fn decode_datagram(bytes: &[u8]) -> Result<Packet, CodecError> {
    decode(bytes, Channel::Unreliable)
}

/// Writes one length-prefixed reliable frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), CodecError> {
    let payload = encode(packet, Channel::Reliable)?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE as usize,
        });
    }

    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed reliable frame.
///
/// Returns [`CodecError::ConnectionClosed`] when the peer closes the stream
/// before a complete frame arrives.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Packet, CodecError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CodecError::ConnectionClosed);
        }
        Err(e) => return Err(CodecError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len as usize,
            max: MAX_FRAME_SIZE as usize,
        });
    }

    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CodecError::ConnectionClosed);
        }
        Err(e) => return Err(CodecError::Io(e)),
    }

    decode(&payload, Channel::Reliable)
}
