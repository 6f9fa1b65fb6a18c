//! TCP wire format for block transfers.
//!
//! # Wire format
//!
//! Every packet starts with a one-byte discriminator. All integers are
//! big-endian.
//!
//! ```text
//! DESCRIPTOR (type 1):
//!   [2 bytes u16: name_len]
//!   [name_len bytes: file name UTF-8]
//!   [8 bytes i64: total_size]
//!   [4 bytes i32: block_size]
//!
//! BLOCK (type 2):
//!   [8 bytes i64: block index]
//!   [4 bytes i32: length]
//!   [length bytes: payload]
//!
//! DIGEST (type 3):
//!   [2 bytes u16: digest_len]
//!   [digest_len bytes: content hash]
//! ```
//!
//! A connection carries one descriptor, any number of blocks, and a final
//! digest. The codec neither buffers nor retries: wrap sockets in
//! `BufReader`/`BufWriter` and flush when needed.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_BLOCK_SIZE;
use crate::error::WireError;
use crate::types::{Block, FileDescriptor, TransferDigest};

/// Packet discriminator: file descriptor handshake.
pub const PACKET_DESCRIPTOR: u8 = 1;

/// Packet discriminator: data block.
pub const PACKET_BLOCK: u8 = 2;

/// Packet discriminator: end-of-transfer digest.
pub const PACKET_DIGEST: u8 = 3;

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Descriptor(FileDescriptor),
    Block(Block),
    Digest(TransferDigest),
}

impl Packet {
    /// Wire discriminator for this packet.
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Descriptor(_) => PACKET_DESCRIPTOR,
            Packet::Block(_) => PACKET_BLOCK,
            Packet::Digest(_) => PACKET_DIGEST,
        }
    }

    /// Short name used in log lines and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Descriptor(_) => "descriptor",
            Packet::Block(_) => "block",
            Packet::Digest(_) => "digest",
        }
    }
}

/// Writes any packet to the stream.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), WireError> {
    match packet {
        Packet::Descriptor(d) => write_descriptor(writer, d).await,
        Packet::Block(b) => write_block(writer, b).await,
        Packet::Digest(d) => write_digest(writer, d).await,
    }
}

/// Writes a descriptor packet.
pub async fn write_descriptor<W: AsyncWrite + Unpin>(
    writer: &mut W,
    descriptor: &FileDescriptor,
) -> Result<(), WireError> {
    let name_bytes = descriptor.name.as_bytes();
    let name_len = name_bytes.len();
    if name_len > u16::MAX as usize {
        return Err(WireError::Protocol(format!(
            "file name too long: {name_len} bytes (max {})",
            u16::MAX
        )));
    }
    let total_size = i64::try_from(descriptor.total_size).map_err(|_| {
        WireError::Protocol(format!("file too large: {} bytes", descriptor.total_size))
    })?;
    let block_size = i32::try_from(descriptor.block_size).map_err(|_| {
        WireError::Protocol(format!("block size too large: {}", descriptor.block_size))
    })?;

    writer.write_u8(PACKET_DESCRIPTOR).await?;
    writer.write_u16(name_len as u16).await?;
    writer.write_all(name_bytes).await?;
    writer.write_i64(total_size).await?;
    writer.write_i32(block_size).await?;
    Ok(())
}

/// Writes a block packet.
pub async fn write_block<W: AsyncWrite + Unpin>(
    writer: &mut W,
    block: &Block,
) -> Result<(), WireError> {
    let index = i64::try_from(block.index)
        .map_err(|_| WireError::Protocol(format!("block index too large: {}", block.index)))?;
    let length = i32::try_from(block.payload.len()).map_err(|_| {
        WireError::Protocol(format!("block too large: {} bytes", block.payload.len()))
    })?;

    writer.write_u8(PACKET_BLOCK).await?;
    writer.write_i64(index).await?;
    writer.write_i32(length).await?;
    writer.write_all(&block.payload).await?;
    Ok(())
}

/// Writes a digest packet.
pub async fn write_digest<W: AsyncWrite + Unpin>(
    writer: &mut W,
    digest: &TransferDigest,
) -> Result<(), WireError> {
    let digest_len = digest.digest.len();
    if digest_len > u16::MAX as usize {
        return Err(WireError::Protocol(format!(
            "digest too long: {digest_len} bytes (max {})",
            u16::MAX
        )));
    }

    writer.write_u8(PACKET_DIGEST).await?;
    writer.write_u16(digest_len as u16).await?;
    writer.write_all(&digest.digest).await?;
    Ok(())
}

/// Reads the next packet from the stream.
///
/// Returns `None` if the stream ends cleanly before a packet starts. An
/// end of stream anywhere inside a packet is a [`WireError::Framing`].
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Packet>, WireError> {
    let packet_type = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let packet = match packet_type {
        PACKET_DESCRIPTOR => Packet::Descriptor(read_descriptor_body(reader).await?),
        PACKET_BLOCK => Packet::Block(read_block_body(reader).await?),
        PACKET_DIGEST => Packet::Digest(read_digest_body(reader).await?),
        other => return Err(WireError::UnknownPacket(other)),
    };
    Ok(Some(packet))
}

async fn read_descriptor_body<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<FileDescriptor, WireError> {
    let name_len = reader.read_u16().await.map_err(truncated("name length"))?;
    let mut name_buf = vec![0u8; name_len as usize];
    reader
        .read_exact(&mut name_buf)
        .await
        .map_err(truncated("file name"))?;
    let name = String::from_utf8(name_buf)
        .map_err(|e| WireError::Framing(format!("invalid UTF-8 file name: {e}")))?;

    let total_size = reader.read_i64().await.map_err(truncated("total size"))?;
    let block_size = reader.read_i32().await.map_err(truncated("block size"))?;

    if total_size < 0 {
        return Err(WireError::Framing(format!(
            "negative total size: {total_size}"
        )));
    }
    if block_size <= 0 || block_size as u32 > MAX_BLOCK_SIZE {
        return Err(WireError::Framing(format!(
            "block size out of range: {block_size}"
        )));
    }

    Ok(FileDescriptor {
        name,
        total_size: total_size as u64,
        block_size: block_size as u32,
    })
}

async fn read_block_body<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Block, WireError> {
    let index = reader.read_i64().await.map_err(truncated("block index"))?;
    let length = reader.read_i32().await.map_err(truncated("block length"))?;

    if index < 0 {
        return Err(WireError::Framing(format!("negative block index: {index}")));
    }
    if length < 0 || length as u32 > MAX_BLOCK_SIZE {
        return Err(WireError::Framing(format!(
            "block length out of range: {length}"
        )));
    }

    let mut payload = vec![0u8; length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(truncated("block payload"))?;

    Ok(Block {
        index: index as u64,
        payload,
    })
}

async fn read_digest_body<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<TransferDigest, WireError> {
    let digest_len = reader.read_u16().await.map_err(truncated("digest length"))?;
    let mut digest = vec![0u8; digest_len as usize];
    reader
        .read_exact(&mut digest)
        .await
        .map_err(truncated("digest"))?;
    Ok(TransferDigest { digest })
}

/// Maps an EOF inside a packet to a framing error naming the field.
fn truncated(field: &'static str) -> impl FnOnce(io::Error) -> WireError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WireError::Framing(format!("stream ended inside {field}"))
        } else {
            WireError::Io(e)
        }
    }
}
