//! Block producer: reads the source in order, hashes it, feeds the queue.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use parxfer_protocol::{Block, FileDescriptor, TransferDigest};

use crate::error::SenderError;

/// Producer outcome as seen by the tunnels.
///
/// Kept separate from the block queue so that a closed queue always means
/// "no more blocks" and never doubles as an error signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestState {
    Pending,
    Ready(TransferDigest),
    Failed,
}

/// Reads a source of known length block by block.
///
/// Owns the source and the running MD5; both are dropped once
/// [`run`](Self::run) returns.
pub struct BlockProducer<R> {
    source: R,
    descriptor: FileDescriptor,
    hasher: Md5,
}

impl<R: AsyncRead + Unpin> BlockProducer<R> {
    pub fn new(source: R, descriptor: FileDescriptor) -> Self {
        Self {
            source,
            descriptor,
            hasher: Md5::new(),
        }
    }

    /// Publishes every block to `queue`, then the final digest to `digest_tx`.
    ///
    /// The queue is closed (sender dropped) only after the digest state is
    /// published, so a tunnel that sees the end of the queue can read the
    /// outcome right away.
    pub async fn run(
        mut self,
        queue: mpsc::Sender<Block>,
        digest_tx: watch::Sender<DigestState>,
    ) -> Result<TransferDigest, SenderError> {
        let result = self.produce(&queue).await;
        match &result {
            Ok(digest) => {
                info!(
                    name = %self.descriptor.name,
                    blocks = self.descriptor.block_count(),
                    %digest,
                    "all blocks read"
                );
                digest_tx.send_replace(DigestState::Ready(digest.clone()));
            }
            Err(e) => {
                error!(name = %self.descriptor.name, "block producer failed: {e}");
                digest_tx.send_replace(DigestState::Failed);
            }
        }
        drop(queue);
        result
    }

    async fn produce(
        &mut self,
        queue: &mpsc::Sender<Block>,
    ) -> Result<TransferDigest, SenderError> {
        let block_count = self.descriptor.block_count();
        debug!(name = %self.descriptor.name, block_count, "producing blocks");

        for index in 0..block_count {
            let block = self.read_block(index).await?;
            queue
                .send(block)
                .await
                .map_err(|_| SenderError::QueueClosed { index })?;
        }

        let hasher = std::mem::take(&mut self.hasher);
        Ok(TransferDigest::new(hasher.finalize().to_vec()))
    }

    /// Reads exactly the bytes of block `index` and folds them into the hash.
    async fn read_block(&mut self, index: u64) -> Result<Block, SenderError> {
        let expected = self.descriptor.block_len(index).ok_or_else(|| {
            SenderError::InvalidSource(format!("block index {index} out of range"))
        })?;

        let mut payload = vec![0u8; expected as usize];
        self.source
            .read_exact(&mut payload)
            .await
            .map_err(|source| SenderError::SourceShortRead {
                index,
                expected,
                source,
            })?;
        self.hasher.update(&payload);

        Ok(Block { index, payload })
    }
}

/// Opens `path` and describes it for the handshake.
///
/// The descriptor name is the final path component.
pub async fn open_source(
    path: &Path,
    block_size: u32,
) -> Result<(tokio::fs::File, FileDescriptor), SenderError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SenderError::InvalidSource(format!("no file name: {}", path.display())))?;

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| SenderError::OpenSource {
            path: path.display().to_string(),
            source,
        })?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(SenderError::InvalidSource(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    let descriptor = FileDescriptor::new(name, metadata.len(), block_size)?;
    Ok((file, descriptor))
}
