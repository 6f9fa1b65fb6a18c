//! Transfer data model shared by sender and receiver.

use std::fmt;

use crate::MAX_BLOCK_SIZE;
use crate::error::WireError;

/// Handshake declaring the file a connection belongs to.
///
/// The `name` doubles as the receiver-side registry key, so it must be
/// unique among concurrently active transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// File name as reported by the sender (no directory part).
    pub name: String,
    /// Total file size in bytes.
    pub total_size: u64,
    /// Nominal block size in bytes (always > 0).
    pub block_size: u32,
}

impl FileDescriptor {
    /// Builds a descriptor, rejecting a zero or oversized block size.
    pub fn new(
        name: impl Into<String>,
        total_size: u64,
        block_size: u32,
    ) -> Result<Self, WireError> {
        if block_size == 0 {
            return Err(WireError::Protocol("block size must be positive".into()));
        }
        if block_size > MAX_BLOCK_SIZE {
            return Err(WireError::Protocol(format!(
                "block size {block_size} exceeds maximum {MAX_BLOCK_SIZE}"
            )));
        }
        Ok(Self {
            name: name.into(),
            total_size,
            block_size,
        })
    }

    /// Number of blocks: `ceil(total_size / block_size)`.
    pub fn block_count(&self) -> u64 {
        self.total_size.div_ceil(u64::from(self.block_size))
    }

    /// Payload length of the block at `index`, or `None` when out of range.
    ///
    /// Every block is `block_size` long except the last, which carries the
    /// remainder (and is a full block when the size divides evenly).
    pub fn block_len(&self, index: u64) -> Option<u32> {
        let count = self.block_count();
        if index >= count {
            return None;
        }
        if index < count - 1 {
            return Some(self.block_size);
        }
        let tail = self.total_size - u64::from(self.block_size) * (count - 1);
        Some(tail as u32)
    }

    /// Absolute byte offset of the block at `index`.
    pub fn block_offset(&self, index: u64) -> u64 {
        u64::from(self.block_size) * index
    }
}

/// One contiguous chunk of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// 0-based block ordinal.
    pub index: u64,
    /// Raw block bytes.
    pub payload: Vec<u8>,
}

impl Block {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Content hash computed by the sender over all blocks in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDigest {
    pub digest: Vec<u8>,
}

impl TransferDigest {
    pub fn new(digest: impl Into<Vec<u8>>) -> Self {
        Self {
            digest: digest.into(),
        }
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Display for TransferDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
