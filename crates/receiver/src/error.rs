//! Error types for the receiving side.

use parxfer_protocol::WireError;

/// Errors produced while receiving a file.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no active transfer for {0}")]
    UnknownFile(String),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
