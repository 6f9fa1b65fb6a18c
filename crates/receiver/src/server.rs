//! TCP accept loop of the receiver.
//!
//! Every accepted connection gets its own [`Session`]; sessions of the
//! same file meet in the shared [`FileRegistry`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parxfer_protocol::{DEFAULT_PORT, TCP_BUFFER_SIZE};

use crate::error::ReceiverError;
use crate::finalize::FinalizeReport;
use crate::registry::FileRegistry;
use crate::session::Session;

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory where received files are written.
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Multi-connection file receiver.
pub struct TransferServer {
    config: ServerConfig,
    registry: Arc<FileRegistry>,
}

impl TransferServer {
    /// Creates a server; finalization reports go to `reports` when given.
    pub fn new(
        config: ServerConfig,
        reports: Option<mpsc::UnboundedSender<FinalizeReport>>,
    ) -> Self {
        let registry = Arc::new(FileRegistry::new(config.output_dir.clone(), reports));
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Creates the output directory and binds `0.0.0.0:<port>`.
    pub async fn bind(&self) -> Result<TcpListener, ReceiverError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ReceiverError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(
            addr = %listener.local_addr()?,
            output_dir = %self.config.output_dir.display(),
            "listening"
        );
        Ok(listener)
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// Accept errors are logged and do not stop the loop. Sessions already
    /// running are left to finish on their own.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ReceiverError> {
        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("receiver shutting down");
                    return Ok(());
                }
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
            };

            let id = self.registry.next_session_id();
            debug!(session = id, %addr, "connection accepted");
            let session = Session::new(id, Arc::clone(&self.registry));
            tokio::spawn(handle_connection(session, stream));
        }
    }

    /// Binds and serves until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ReceiverError> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await
    }
}

async fn handle_connection(session: Session, stream: TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {e}");
    }
    let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, stream);
    // Outcome is logged by the session itself.
    let _ = session.run(&mut reader).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use md5::{Digest, Md5};
    use parxfer_protocol::wire::{write_block, write_descriptor, write_digest};
    use parxfer_protocol::{Block, FileDescriptor, TransferDigest};
    use tokio::io::AsyncWriteExt;

    struct Running {
        addr: std::net::SocketAddr,
        registry: Arc<FileRegistry>,
        cancel: CancellationToken,
        reports: mpsc::UnboundedReceiver<FinalizeReport>,
        handle: tokio::task::JoinHandle<Result<(), ReceiverError>>,
    }

    async fn start(dir: &std::path::Path) -> Running {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = TransferServer::new(
            ServerConfig {
                port: 0,
                output_dir: dir.to_path_buf(),
            },
            Some(tx),
        );
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::clone(server.registry());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { server.serve(listener, cancel).await }
        });
        Running {
            addr,
            registry,
            cancel,
            reports: rx,
            handle,
        }
    }

    #[tokio::test]
    async fn receives_file_over_two_connections() {
        let dir = tempfile::tempdir().unwrap();
        let mut running = start(dir.path()).await;
        let port = running.addr.port();

        let data = b"abcdefghij".to_vec();
        let descriptor = FileDescriptor::new("net.bin", 10, 4).unwrap();
        let digest = TransferDigest::new(Md5::digest(&data).to_vec());

        let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        write_descriptor(&mut first, &descriptor).await.unwrap();
        write_descriptor(&mut second, &descriptor).await.unwrap();
        first.flush().await.unwrap();
        second.flush().await.unwrap();
        while running.registry.attached_sessions("net.bin").await < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for (index, chunk) in data.chunks(4).enumerate() {
            let stream = if index % 2 == 0 { &mut first } else { &mut second };
            let block = Block {
                index: index as u64,
                payload: chunk.to_vec(),
            };
            write_block(stream, &block).await.unwrap();
        }
        write_digest(&mut first, &digest).await.unwrap();
        write_digest(&mut second, &digest).await.unwrap();
        first.shutdown().await.unwrap();
        second.shutdown().await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(10), running.reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.name, "net.bin");
        assert!(report.outcome.is_verified());
        assert_eq!(std::fs::read(dir.path().join("net.bin")).unwrap(), data);

        running.cancel.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let server = TransferServer::new(
            ServerConfig {
                port: 0,
                output_dir: out.clone(),
            },
            None,
        );
        let _listener = server.bind().await.unwrap();
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let server = TransferServer::new(
            ServerConfig {
                port: taken.local_addr().unwrap().port(),
                output_dir: dir.path().to_path_buf(),
            },
            None,
        );
        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ReceiverError::Bind { .. }));
    }

    #[tokio::test]
    async fn cancel_stops_accept_loop() {
        let dir = tempfile::tempdir().unwrap();
        let running = start(dir.path()).await;
        running.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), running.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.output_dir, PathBuf::from("."));
    }
}
