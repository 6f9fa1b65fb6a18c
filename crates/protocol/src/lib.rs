//! Wire protocol for multi-connection file transfers.
//!
//! A sender splits one file into fixed-size blocks and spreads them over
//! several TCP connections. Every connection carries the same handshake
//! ([`FileDescriptor`]), a subset of the blocks, and the final content
//! digest ([`TransferDigest`]).
//!
//! # Wire format
//!
//! See the [`wire`] module for the packet layout.

pub mod error;
pub mod types;
pub mod wire;

pub use error::WireError;
pub use types::{Block, FileDescriptor, TransferDigest};
pub use wire::Packet;

use std::time::Duration;

/// Default TCP port for the receiver.
pub const DEFAULT_PORT: u16 = 13333;

/// Default number of parallel connections per transfer.
pub const DEFAULT_CONNECTIONS: usize = 8;

/// Default nominal block size (256 KB).
pub const DEFAULT_BLOCK_SIZE: u32 = 256 * 1024;

/// Largest block size accepted on the wire (64 MB).
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// Capacity of the sender's producer/tunnel block queue.
pub const BLOCK_QUEUE_CAPACITY: usize = 10;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for a single tunnel's connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
