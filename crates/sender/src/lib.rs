//! Sending side of a multi-connection file transfer.
//!
//! A [`BlockProducer`](producer::BlockProducer) reads the source in block
//! order, hashes it, and feeds a bounded queue. A
//! [`TunnelPool`](tunnel::TunnelPool) of TCP connections drains that queue
//! in parallel; [`TransferClient`] ties both together.

pub mod client;
pub mod error;
pub mod producer;
pub mod stats;
pub mod tunnel;

pub use client::{SendConfig, SendSummary, TransferClient, resolve_address, with_default_port};
pub use error::SenderError;
pub use producer::{BlockProducer, DigestState, open_source};
pub use stats::{Progress, TransferStats};
pub use tunnel::{TunnelPool, TunnelReport};
