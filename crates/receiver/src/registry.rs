//! Registry of in-flight transfers on the receiving side.
//!
//! Every session of one transfer resolves the same [`TransferFile`] through
//! the descriptor name. The entry lives until its last attached session
//! detaches; that detach removes it and runs finalization once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use parxfer_protocol::{FileDescriptor, TransferDigest};

use crate::error::ReceiverError;
use crate::finalize::{FinalizeReport, finalize};
use crate::sink::OutputSink;
use crate::validation::validate_file_name;

/// Identifier of one receiver session.
pub type SessionId = u64;

/// Shared state of one file being received.
#[derive(Debug)]
struct TransferFile {
    descriptor: FileDescriptor,
    sink: Arc<OutputSink>,
    digest: Option<TransferDigest>,
    sessions: HashSet<SessionId>,
}

/// Maps file names to their active transfers.
#[derive(Debug)]
pub struct FileRegistry {
    output_dir: PathBuf,
    files: Mutex<HashMap<String, TransferFile>>,
    next_session: AtomicU64,
    reports: Option<mpsc::UnboundedSender<FinalizeReport>>,
}

impl FileRegistry {
    /// Creates a registry writing into `output_dir`.
    ///
    /// Every finalization report is also forwarded to `reports` when given.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        reports: Option<mpsc::UnboundedSender<FinalizeReport>>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            files: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            reports,
        }
    }

    /// Hands out a fresh session id.
    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// Attaches `session` to the transfer named by `descriptor`.
    ///
    /// The first attach creates the output file pre-sized to the total
    /// size. Later attaches must carry the same sizes.
    pub async fn attach(
        &self,
        descriptor: &FileDescriptor,
        session: SessionId,
    ) -> Result<(), ReceiverError> {
        validate_file_name(&descriptor.name)?;

        let mut files = self.files.lock().await;
        if let Some(file) = files.get_mut(&descriptor.name) {
            if file.descriptor != *descriptor {
                return Err(ReceiverError::Protocol(format!(
                    "descriptor for {} conflicts with active transfer ({} bytes / {} block size)",
                    descriptor.name, file.descriptor.total_size, file.descriptor.block_size
                )));
            }
            file.sessions.insert(session);
            debug!(
                name = %descriptor.name,
                session,
                attached = file.sessions.len(),
                "session attached"
            );
            return Ok(());
        }

        let path = self.output_dir.join(&descriptor.name);
        let sink = OutputSink::create(path, descriptor.total_size).await?;
        info!(
            name = %descriptor.name,
            size = descriptor.total_size,
            block_size = descriptor.block_size,
            blocks = descriptor.block_count(),
            path = %sink.path().display(),
            "receiving file"
        );
        files.insert(
            descriptor.name.clone(),
            TransferFile {
                descriptor: descriptor.clone(),
                sink: Arc::new(sink),
                digest: None,
                sessions: HashSet::from([session]),
            },
        );
        Ok(())
    }

    /// Returns the sink of the active transfer `name`.
    pub async fn sink(&self, name: &str) -> Option<Arc<OutputSink>> {
        let files = self.files.lock().await;
        files.get(name).map(|file| Arc::clone(&file.sink))
    }

    /// Stores the sender's digest for `name`.
    pub async fn record_digest(
        &self,
        name: &str,
        digest: TransferDigest,
    ) -> Result<(), ReceiverError> {
        let mut files = self.files.lock().await;
        let file = files
            .get_mut(name)
            .ok_or_else(|| ReceiverError::UnknownFile(name.to_string()))?;
        if let Some(previous) = &file.digest {
            if *previous != digest {
                warn!(name, previous = %previous, digest = %digest, "sender digest changed");
            }
        }
        file.digest = Some(digest);
        Ok(())
    }

    /// Detaches `session` from `name`.
    ///
    /// The call that empties the session set removes the entry and
    /// finalizes it; every other call returns `None`. Detaching an unknown
    /// session is a no-op.
    pub async fn detach(&self, name: &str, session: SessionId) -> Option<FinalizeReport> {
        let finished = {
            let mut files = self.files.lock().await;
            let file = files.get_mut(name)?;
            if !file.sessions.remove(&session) {
                return None;
            }
            debug!(name, session, remaining = file.sessions.len(), "session detached");
            if !file.sessions.is_empty() {
                return None;
            }
            files.remove(name)?
        };

        let report = finalize(finished.descriptor, finished.sink, finished.digest).await;
        if let Some(reports) = &self.reports {
            // Receiver gone means nobody is listening any more.
            let _ = reports.send(report.clone());
        }
        Some(report)
    }

    /// Swaps the sink of an active transfer.
    #[cfg(test)]
    pub(crate) async fn replace_sink(&self, name: &str, sink: OutputSink) {
        if let Some(file) = self.files.lock().await.get_mut(name) {
            file.sink = Arc::new(sink);
        }
    }

    /// Sessions currently attached to `name`.
    pub async fn attached_sessions(&self, name: &str) -> usize {
        let files = self.files.lock().await;
        files.get(name).map_or(0, |file| file.sessions.len())
    }

    /// Number of transfers in flight.
    pub async fn active_files(&self) -> usize {
        self.files.lock().await.len()
    }
}
