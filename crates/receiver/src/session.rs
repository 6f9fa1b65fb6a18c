//! Per-connection receive loop.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use parxfer_protocol::wire::read_packet;
use parxfer_protocol::{Block, FileDescriptor, Packet};

use crate::error::ReceiverError;
use crate::registry::{FileRegistry, SessionId};

/// Where a session is in its packet sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingDescriptor,
    Transferring,
    Closed,
}

/// What one session did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    /// Name from the descriptor, if one arrived.
    pub file: Option<String>,
    pub blocks_written: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
    pub digest_received: bool,
    /// Whether this session's detach finalized the file.
    pub finalized: bool,
}

/// Handler bound to one accepted connection.
pub struct Session {
    id: SessionId,
    registry: Arc<FileRegistry>,
    state: SessionState,
    descriptor: Option<FileDescriptor>,
    report: SessionReport,
}

impl Session {
    pub fn new(id: SessionId, registry: Arc<FileRegistry>) -> Self {
        Self {
            id,
            registry,
            state: SessionState::AwaitingDescriptor,
            descriptor: None,
            report: SessionReport {
                id,
                ..Default::default()
            },
        }
    }

    /// Reads packets until the digest, end of stream, or an error.
    ///
    /// Once attached, the session detaches from the registry on every exit
    /// path. The returned error (if any) ended this session only.
    pub async fn run<R: AsyncRead + Unpin>(
        mut self,
        reader: &mut R,
    ) -> (SessionReport, Option<ReceiverError>) {
        let result = self.read_loop(reader).await;
        self.state = SessionState::Closed;

        if let Some(descriptor) = self.descriptor.take() {
            self.report.finalized = self
                .registry
                .detach(&descriptor.name, self.id)
                .await
                .is_some();
        }

        match &result {
            Ok(()) => info!(
                session = self.id,
                blocks = self.report.blocks_written,
                bytes = self.report.bytes_written,
                digest = self.report.digest_received,
                "session closed"
            ),
            Err(e) => warn!(
                session = self.id,
                blocks = self.report.blocks_written,
                "session aborted: {e}"
            ),
        }
        (self.report, result.err())
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<(), ReceiverError> {
        while self.state != SessionState::Closed {
            let Some(packet) = read_packet(reader).await? else {
                if self.state == SessionState::AwaitingDescriptor {
                    debug!(session = self.id, "connection closed before descriptor");
                }
                return Ok(());
            };
            debug!(session = self.id, kind = packet.kind(), "packet received");

            match (self.state, packet) {
                (SessionState::AwaitingDescriptor, Packet::Descriptor(descriptor)) => {
                    self.registry.attach(&descriptor, self.id).await?;
                    self.report.file = Some(descriptor.name.clone());
                    self.descriptor = Some(descriptor);
                    self.state = SessionState::Transferring;
                }
                (SessionState::AwaitingDescriptor, other) => {
                    return Err(ReceiverError::Protocol(format!(
                        "expected descriptor, got {}",
                        other.kind()
                    )));
                }
                (_, Packet::Descriptor(_)) => {
                    return Err(ReceiverError::Protocol(
                        "descriptor repeated on one connection".into(),
                    ));
                }
                (_, Packet::Block(block)) => self.write_block(block).await?,
                (_, Packet::Digest(digest)) => {
                    let name = self.file_name()?;
                    self.registry.record_digest(&name, digest).await?;
                    self.report.digest_received = true;
                    self.state = SessionState::Closed;
                }
            }
        }
        Ok(())
    }

    async fn write_block(&mut self, block: Block) -> Result<(), ReceiverError> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| ReceiverError::Protocol("block before descriptor".into()))?;

        let expected = descriptor.block_len(block.index).ok_or_else(|| {
            ReceiverError::Protocol(format!(
                "block index {} out of range ({} blocks)",
                block.index,
                descriptor.block_count()
            ))
        })?;
        if block.len() != expected as usize {
            return Err(ReceiverError::Protocol(format!(
                "block {} has {} bytes, expected {expected}",
                block.index,
                block.len()
            )));
        }

        let offset = descriptor.block_offset(block.index);
        let sink = self
            .registry
            .sink(&descriptor.name)
            .await
            .ok_or_else(|| ReceiverError::UnknownFile(descriptor.name.clone()))?;

        let len = block.len() as u64;
        match sink.write_at(offset, block.payload).await {
            Ok(()) => {
                self.report.blocks_written += 1;
                self.report.bytes_written += len;
            }
            Err(e) => {
                self.report.write_errors += 1;
                warn!(session = self.id, index = block.index, offset, "block write failed: {e}");
            }
        }
        Ok(())
    }

    fn file_name(&self) -> Result<String, ReceiverError> {
        self.descriptor
            .as_ref()
            .map(|d| d.name.clone())
            .ok_or_else(|| ReceiverError::Protocol("digest before descriptor".into()))
    }
}
