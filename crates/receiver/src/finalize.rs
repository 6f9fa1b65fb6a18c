//! One-time verification of a completed file.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::{error, info, warn};

use parxfer_protocol::{FileDescriptor, TransferDigest};

use crate::sink::OutputSink;

/// Read buffer used when re-hashing the output file.
const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// Result of comparing the reassembled file with the sender's digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Recomputed digest equals the one the sender reported.
    Verified { digest: TransferDigest },
    /// The file differs from what the sender read.
    Mismatch {
        expected: TransferDigest,
        actual: TransferDigest,
    },
    /// Every session went away before a digest packet arrived.
    DigestMissing { actual: TransferDigest },
    /// The output file could not be re-read.
    Unreadable(String),
}

impl FinalizeOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, FinalizeOutcome::Verified { .. })
    }
}

/// Outcome of finalizing one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub name: String,
    pub path: PathBuf,
    pub total_size: u64,
    pub outcome: FinalizeOutcome,
}

/// Computes the MD5 of the whole file at `path`.
pub async fn file_digest(path: &Path) -> io::Result<TransferDigest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<TransferDigest> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(TransferDigest::new(hasher.finalize().to_vec()))
    })
    .await
    .map_err(io::Error::other)?
}

/// Closes the sink, re-reads the file, and compares digests.
///
/// Called by the registry exactly once per transfer, after the entry has
/// been removed.
pub(crate) async fn finalize(
    descriptor: FileDescriptor,
    sink: Arc<OutputSink>,
    expected: Option<TransferDigest>,
) -> FinalizeReport {
    let path = sink.path().to_path_buf();
    if let Err(e) = sink.sync_all().await {
        warn!(name = %descriptor.name, "flushing output failed: {e}");
    }
    drop(sink);

    let outcome = match file_digest(&path).await {
        Err(e) => {
            error!(
                name = %descriptor.name,
                path = %path.display(),
                "re-reading output failed: {e}"
            );
            FinalizeOutcome::Unreadable(e.to_string())
        }
        Ok(actual) => match expected {
            None => {
                warn!(
                    name = %descriptor.name,
                    receiver = %actual,
                    "file closed without a sender digest"
                );
                FinalizeOutcome::DigestMissing { actual }
            }
            Some(expected) if expected == actual => {
                info!(
                    name = %descriptor.name,
                    size = descriptor.total_size,
                    digest = %actual,
                    "digest ok"
                );
                FinalizeOutcome::Verified { digest: actual }
            }
            Some(expected) => {
                warn!(
                    name = %descriptor.name,
                    sender = %expected,
                    receiver = %actual,
                    "invalid digest"
                );
                FinalizeOutcome::Mismatch { expected, actual }
            }
        },
    };

    FinalizeReport {
        name: descriptor.name,
        path,
        total_size: descriptor.total_size,
        outcome,
    }
}
