//! Sending a whole file: producer plus tunnel pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use parxfer_protocol::{
    BLOCK_QUEUE_CAPACITY, DEFAULT_BLOCK_SIZE, DEFAULT_CONNECTIONS, DEFAULT_PORT, FileDescriptor,
    TransferDigest,
};

use crate::error::SenderError;
use crate::producer::{BlockProducer, DigestState, open_source};
use crate::stats::{Progress, TransferStats};
use crate::tunnel::{TunnelPool, TunnelReport};

/// Parameters of one outgoing transfer.
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Receiver address, `HOST` or `HOST:PORT`.
    pub address: String,
    /// File to send.
    pub path: PathBuf,
    /// Number of parallel connections.
    pub connections: usize,
    /// Nominal block size in bytes.
    pub block_size: u32,
}

impl SendConfig {
    /// Config with the default connection count and block size.
    pub fn new(address: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            connections: DEFAULT_CONNECTIONS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Result of a finished transfer, as far as the sender can tell.
///
/// The protocol has no acknowledgement channel: whether the receiver's
/// digest check passed is only visible on the receiving side.
#[derive(Debug, Clone)]
pub struct SendSummary {
    pub descriptor: FileDescriptor,
    pub digest: TransferDigest,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub tunnels: Vec<TunnelReport>,
}

impl SendSummary {
    pub fn tunnels_connected(&self) -> usize {
        self.tunnels.iter().filter(|t| t.connected).count()
    }

    /// True when every block went out and no connected tunnel failed.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.descriptor.total_size
            && self
                .tunnels
                .iter()
                .filter(|t| t.connected)
                .all(|t| t.error.is_none() && t.digest_sent)
    }

    /// Average throughput in bytes/second.
    pub fn throughput(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.elapsed.as_secs_f64()
    }
}

/// Appends [`DEFAULT_PORT`] when `address` has none.
pub fn resolve_address(address: &str) -> String {
    with_default_port(address, DEFAULT_PORT)
}

/// Appends `port` when `address` has none. Bracketed IPv6 is understood.
pub fn with_default_port(address: &str, port: u16) -> String {
    let has_port = if let Some(rest) = address.strip_prefix('[') {
        rest.contains("]:")
    } else {
        address.contains(':')
    };
    if has_port {
        address.to_string()
    } else {
        format!("{address}:{port}")
    }
}

/// Sends files over a pool of parallel tunnels.
pub struct TransferClient;

impl TransferClient {
    /// Sends `config.path` and waits until every tunnel has finished.
    ///
    /// Source open failures abort before any connection is made. A failed
    /// dial only removes that tunnel from the pool.
    pub async fn send_file(
        config: &SendConfig,
        progress_tx: Option<mpsc::Sender<Progress>>,
    ) -> Result<SendSummary, SenderError> {
        if config.connections == 0 {
            return Err(SenderError::InvalidConfig(
                "connection count must be positive".into(),
            ));
        }

        let (source, descriptor) = open_source(&config.path, config.block_size).await?;
        let addr = resolve_address(&config.address);
        info!(
            name = %descriptor.name,
            size = descriptor.total_size,
            block_size = descriptor.block_size,
            blocks = descriptor.block_count(),
            connections = config.connections,
            %addr,
            "starting transfer"
        );

        let (queue_tx, queue_rx) = mpsc::channel(BLOCK_QUEUE_CAPACITY);
        let (digest_tx, digest_rx) = watch::channel(DigestState::Pending);
        let producer = tokio::spawn(
            BlockProducer::new(source, descriptor.clone()).run(queue_tx, digest_tx),
        );

        let stats = Arc::new(TransferStats::new(descriptor.total_size));
        let pool = TunnelPool::new(addr, config.connections);
        let tunnels = pool
            .run(
                Arc::new(descriptor.clone()),
                queue_rx,
                digest_rx,
                Arc::clone(&stats),
                progress_tx,
            )
            .await;

        let produced = producer
            .await
            .map_err(|e| SenderError::ProducerFailed(e.to_string()))?;

        if tunnels.iter().all(|t| !t.connected) {
            return Err(SenderError::NoTunnels);
        }
        let digest = produced?;

        let summary = SendSummary {
            descriptor,
            digest,
            bytes_sent: stats.bytes_sent(),
            elapsed: stats.elapsed(),
            tunnels,
        };

        if summary.is_complete() {
            info!(
                name = %summary.descriptor.name,
                bytes = summary.bytes_sent,
                elapsed_s = summary.elapsed.as_secs_f64(),
                speed_kbps = summary.throughput() / 1000.0,
                digest = %summary.digest,
                "transfer sent"
            );
        } else {
            warn!(
                name = %summary.descriptor.name,
                bytes = summary.bytes_sent,
                expected = summary.descriptor.total_size,
                connected = summary.tunnels_connected(),
                "transfer incomplete"
            );
        }
        Ok(summary)
    }
}
