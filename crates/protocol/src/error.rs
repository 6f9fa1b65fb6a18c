//! Error types for the wire codec.

/// Errors produced while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("unknown packet type: {0}")]
    UnknownPacket(u8),

    #[error("protocol error: {0}")]
    Protocol(String),
}
