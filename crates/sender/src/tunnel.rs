//! Parallel tunnels draining the shared block queue.
//!
//! Each tunnel owns one TCP connection. Tunnels pull from the same queue,
//! so whichever connection is free sends the next block.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use parxfer_protocol::wire::{write_block, write_descriptor, write_digest};
use parxfer_protocol::{Block, FileDescriptor, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

use crate::error::SenderError;
use crate::producer::DigestState;
use crate::stats::{Progress, TransferStats};

/// Block queue shared by all tunnels of one transfer.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<Block>>>;

/// What one tunnel did before it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    pub index: usize,
    pub connected: bool,
    pub blocks_sent: u64,
    pub bytes_sent: u64,
    pub digest_sent: bool,
    pub error: Option<String>,
}

impl TunnelReport {
    fn new(index: usize) -> Self {
        Self {
            index,
            connected: false,
            blocks_sent: 0,
            bytes_sent: 0,
            digest_sent: false,
            error: None,
        }
    }
}

/// One sender-side connection.
struct Tunnel {
    index: usize,
    addr: String,
    descriptor: Arc<FileDescriptor>,
    queue: SharedQueue,
    digest_rx: watch::Receiver<DigestState>,
    stats: Arc<TransferStats>,
    progress_tx: Option<mpsc::Sender<Progress>>,
}

impl Tunnel {
    /// Dials, streams blocks until the queue is drained, then closes.
    ///
    /// Never fails: dial and write errors end up in the report.
    async fn run(mut self) -> TunnelReport {
        let mut report = TunnelReport::new(self.index);

        let stream = match self.connect().await {
            Ok(s) => s,
            Err(e) => {
                warn!(tunnel = self.index, addr = %self.addr, "dial failed: {e}");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.connected = true;
        debug!(tunnel = self.index, addr = %self.addr, "tunnel connected");

        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, stream);
        let result = self.stream_blocks(&mut writer, &mut report).await;

        // Flushes what is buffered and sends FIN on every path.
        let closed = writer.shutdown().await;

        if let Err(e) = result {
            warn!(tunnel = self.index, "tunnel aborted: {e}");
            report.error = Some(e.to_string());
        } else if let Err(e) = closed {
            warn!(tunnel = self.index, "tunnel close failed: {e}");
            report.error = Some(e.to_string());
        }

        let progress = self.stats.snapshot();
        info!(
            tunnel = self.index,
            blocks = report.blocks_sent,
            bytes = report.bytes_sent,
            total_sent = progress.bytes_sent,
            elapsed_s = progress.elapsed.as_secs_f64(),
            speed_kbps = progress.average_bps / 1000.0,
            "tunnel done"
        );
        report
    }

    async fn connect(&self) -> Result<TcpStream, SenderError> {
        let stream = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SenderError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn stream_blocks(
        &mut self,
        writer: &mut BufWriter<TcpStream>,
        report: &mut TunnelReport,
    ) -> Result<(), SenderError> {
        write_descriptor(writer, &self.descriptor).await?;
        // Get the handshake out before waiting on the queue.
        writer.flush().await?;

        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let Some(block) = next else {
                debug!(tunnel = self.index, "block queue drained");
                break;
            };

            write_block(writer, &block).await?;

            let len = block.len() as u64;
            report.blocks_sent += 1;
            report.bytes_sent += len;
            let progress = self.stats.record(len);
            debug!(
                tunnel = self.index,
                block = block.index,
                total_sent = progress.bytes_sent,
                percent = progress.percent(),
                speed_kbps = progress.current_bps / 1000.0,
                "block sent"
            );
            if let Some(tx) = &self.progress_tx {
                // Report progress (non-blocking).
                let _ = tx.try_send(progress);
            }
        }

        let state = self
            .digest_rx
            .wait_for(|s| !matches!(s, DigestState::Pending))
            .await
            .map(|s| (*s).clone());

        match state {
            Ok(DigestState::Ready(digest)) => {
                write_digest(writer, &digest).await?;
                report.digest_sent = true;
                debug!(tunnel = self.index, %digest, "digest sent");
            }
            _ => warn!(
                tunnel = self.index,
                "block producer did not finish, closing without digest"
            ),
        }
        Ok(())
    }
}

/// A fixed number of tunnels to one receiver.
pub struct TunnelPool {
    addr: String,
    connections: usize,
}

impl TunnelPool {
    pub fn new(addr: impl Into<String>, connections: usize) -> Self {
        Self {
            addr: addr.into(),
            connections,
        }
    }

    /// Starts every tunnel and waits until all of them have finished.
    ///
    /// Returns one report per tunnel, in tunnel order.
    pub async fn run(
        &self,
        descriptor: Arc<FileDescriptor>,
        queue: mpsc::Receiver<Block>,
        digest_rx: watch::Receiver<DigestState>,
        stats: Arc<TransferStats>,
        progress_tx: Option<mpsc::Sender<Progress>>,
    ) -> Vec<TunnelReport> {
        let queue: SharedQueue = Arc::new(Mutex::new(queue));

        let handles: Vec<_> = (0..self.connections)
            .map(|index| {
                let tunnel = Tunnel {
                    index,
                    addr: self.addr.clone(),
                    descriptor: Arc::clone(&descriptor),
                    queue: Arc::clone(&queue),
                    digest_rx: digest_rx.clone(),
                    stats: Arc::clone(&stats),
                    progress_tx: progress_tx.clone(),
                };
                tokio::spawn(tunnel.run())
            })
            .collect();

        // Only tunnels keep the queue alive: if they all go away, the
        // producer sees a closed queue instead of blocking forever.
        drop(queue);

        let mut reports = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(tunnel = index, "tunnel task failed: {e}");
                    let mut report = TunnelReport::new(index);
                    report.error = Some(e.to_string());
                    reports.push(report);
                }
            }
        }
        reports
    }
}
