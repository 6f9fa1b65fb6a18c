//! Error types for the sending side.

use parxfer_protocol::WireError;

/// Errors produced while sending a file.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("cannot open source {path}: {source}")]
    OpenSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("short read on block {index}: expected {expected} bytes: {source}")]
    SourceShortRead {
        index: u64,
        expected: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("block queue closed before block {index} was published")]
    QueueClosed { index: u64 },

    #[error("block producer failed: {0}")]
    ProducerFailed(String),

    #[error("no tunnel could connect")]
    NoTunnels,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection timed out")]
    Timeout,
}
