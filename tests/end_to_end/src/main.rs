fn main() {
    println!("Run `cargo test -p end-to-end` to execute loopback transfer tests.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use md5::{Digest, Md5};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use parxfer_protocol::TransferDigest;
    use parxfer_receiver::{FinalizeReport, ServerConfig, TransferServer};
    use parxfer_sender::{SendConfig, SenderError, TransferClient};

    const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

    struct Receiver {
        addr: SocketAddr,
        output_dir: PathBuf,
        reports: mpsc::UnboundedReceiver<FinalizeReport>,
        pending: Vec<FinalizeReport>,
        cancel: CancellationToken,
    }

    impl Receiver {
        async fn start(output_dir: &Path) -> Self {
            let (tx, reports) = mpsc::unbounded_channel();
            let server = TransferServer::new(
                ServerConfig {
                    port: 0,
                    output_dir: output_dir.to_path_buf(),
                },
                Some(tx),
            );
            let listener = server.bind().await.unwrap();
            let addr = listener.local_addr().unwrap();
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move { server.serve(listener, cancel).await }
            });
            Self {
                addr,
                output_dir: output_dir.to_path_buf(),
                reports,
                pending: Vec::new(),
                cancel,
            }
        }

        fn address(&self) -> String {
            format!("127.0.0.1:{}", self.addr.port())
        }

        /// Waits for a verified finalization of `name`.
        ///
        /// A connection whose descriptor arrives after its siblings already
        /// finalized opens a second generation of the file, so one name can
        /// produce more than one report.
        async fn verified(&mut self, name: &str) -> FinalizeReport {
            if let Some(pos) = self
                .pending
                .iter()
                .position(|r| r.name == name && r.outcome.is_verified())
            {
                return self.pending.remove(pos);
            }
            loop {
                let report = tokio::time::timeout(REPORT_TIMEOUT, self.reports.recv())
                    .await
                    .unwrap_or_else(|_| {
                        panic!("no verified report for {name}; seen {:?}", self.pending)
                    })
                    .expect("report channel closed");
                if report.name == name && report.outcome.is_verified() {
                    return report;
                }
                self.pending.push(report);
            }
        }

        /// Reports for `name` that did not verify, including ones that have
        /// arrived but were never waited for.
        fn failures(&mut self, name: &str) -> Vec<FinalizeReport> {
            while let Ok(report) = self.reports.try_recv() {
                self.pending.push(report);
            }
            self.pending
                .iter()
                .filter(|r| r.name == name && !r.outcome.is_verified())
                .cloned()
                .collect()
        }
    }

    impl Drop for Receiver {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    /// Deterministic pseudo-random content.
    fn content(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn send(
        receiver: &Receiver,
        path: &Path,
        connections: usize,
        block_size: u32,
    ) -> parxfer_sender::SendSummary {
        let mut config = SendConfig::new(receiver.address(), path);
        config.connections = connections;
        config.block_size = block_size;
        TransferClient::send_file(&config, None).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn million_bytes_over_eight_tunnels() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::start(dst.path()).await;

        let data = content(1_000_000, 7);
        let path = write_source(src.path(), "million.bin", &data);

        let summary = send(&receiver, &path, 8, 262_144).await;
        assert!(summary.is_complete());
        assert_eq!(summary.descriptor.block_count(), 4);
        assert_eq!(summary.bytes_sent, 1_000_000);
        assert_eq!(
            summary.digest,
            TransferDigest::new(Md5::digest(&data).to_vec())
        );

        let report = receiver.verified("million.bin").await;
        assert_eq!(report.total_size, 1_000_000);
        assert!(receiver.failures("million.bin").is_empty());
        assert_eq!(
            std::fs::read(receiver.output_dir.join("million.bin")).unwrap(),
            data
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_file_is_verified() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::start(dst.path()).await;
        let path = write_source(src.path(), "empty.bin", b"");

        let summary = send(&receiver, &path, 3, 1024).await;
        assert!(summary.is_complete());
        assert_eq!(summary.bytes_sent, 0);

        receiver.verified("empty.bin").await;
        assert!(receiver.failures("empty.bin").is_empty());
        assert_eq!(
            std::fs::metadata(receiver.output_dir.join("empty.bin"))
                .unwrap()
                .len(),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn any_connection_count_reassembles() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::start(dst.path()).await;

        for (i, connections) in [1usize, 2, 5, 16].into_iter().enumerate() {
            let name = format!("count-{connections}.bin");
            let data = content(123_457, i as u32 + 1);
            let path = write_source(src.path(), &name, &data);

            let summary = send(&receiver, &path, connections, 10_000).await;
            assert!(summary.is_complete(), "{connections} connections");

            receiver.verified(&name).await;
            assert!(receiver.failures(&name).is_empty());
            assert_eq!(std::fs::read(dst.path().join(&name)).unwrap(), data);
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn colon_in_name_is_received() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::start(dst.path()).await;

        let data = content(50_000, 5);
        let path = write_source(src.path(), "a:b.bin", &data);

        let summary = send(&receiver, &path, 4, 8_192).await;
        assert!(summary.is_complete());

        receiver.verified("a:b.bin").await;
        assert!(receiver.failures("a:b.bin").is_empty());
        assert_eq!(std::fs::read(dst.path().join("a:b.bin")).unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_stay_separate() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let mut receiver = Receiver::start(dst.path()).await;

        let first = content(300_000, 11);
        let second = content(200_001, 12);
        let first_path = write_source(src.path(), "first.bin", &first);
        let second_path = write_source(src.path(), "second.bin", &second);

        let (a, b) = tokio::join!(
            send(&receiver, &first_path, 4, 16_384),
            send(&receiver, &second_path, 4, 16_384)
        );
        assert!(a.is_complete());
        assert!(b.is_complete());

        receiver.verified("first.bin").await;
        receiver.verified("second.bin").await;
        assert_eq!(std::fs::read(dst.path().join("first.bin")).unwrap(), first);
        assert_eq!(std::fs::read(dst.path().join("second.bin")).unwrap(), second);
    }

    #[tokio::test]
    async fn no_listener_means_no_tunnels() {
        let src = tempfile::tempdir().unwrap();
        let path = write_source(src.path(), "lost.bin", &content(5_000, 3));

        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = SendConfig::new(format!("127.0.0.1:{port}"), &path);
        config.connections = 2;

        let err = TransferClient::send_file(&config, None).await.unwrap_err();
        assert!(matches!(err, SenderError::NoTunnels), "{err}");
    }

    #[tokio::test]
    async fn missing_source_fails_before_connecting() {
        let dst = tempfile::tempdir().unwrap();
        let receiver = Receiver::start(dst.path()).await;

        let config = SendConfig::new(receiver.address(), dst.path().join("nope.bin"));
        let err = TransferClient::send_file(&config, None).await.unwrap_err();
        assert!(matches!(err, SenderError::OpenSource { .. }), "{err}");
    }
}
