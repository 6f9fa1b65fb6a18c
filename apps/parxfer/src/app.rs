//! Server and client roles.

use std::path::PathBuf;

use anyhow::bail;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parxfer_receiver::{FinalizeOutcome, FinalizeReport, ServerConfig, TransferServer};
use parxfer_sender::{Progress, SendConfig, TransferClient, with_default_port};

use crate::config::Config;

/// Receives files until Ctrl-C.
pub async fn run_server(
    config: Config,
    port: Option<u16>,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let server_config = ServerConfig {
        port: port.unwrap_or(config.port),
        output_dir: output_dir.unwrap_or(config.output_dir),
    };

    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let server = TransferServer::new(server_config, Some(reports_tx));
    let listener = server.bind().await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("SIGINT received, shutting down");
            }
            cancel.cancel();
        }
    });
    let tally = tokio::spawn(tally_reports(reports_rx));

    server.serve(listener, cancel).await?;

    drop(server);
    tally.abort();
    Ok(())
}

async fn tally_reports(mut reports: mpsc::UnboundedReceiver<FinalizeReport>) {
    let mut verified = 0u64;
    let mut failed = 0u64;
    while let Some(report) = reports.recv().await {
        match report.outcome {
            FinalizeOutcome::Verified { .. } => verified += 1,
            _ => failed += 1,
        }
        tracing::info!(
            name = %report.name,
            path = %report.path.display(),
            verified,
            failed,
            "transfer finished"
        );
    }
}

/// Sends one file and fails unless every block went out.
pub async fn run_client(
    config: Config,
    address: String,
    file: PathBuf,
    connections: Option<usize>,
    block_size: Option<u32>,
) -> anyhow::Result<()> {
    let mut send_config = SendConfig::new(with_default_port(&address, config.port), file);
    send_config.connections = connections.unwrap_or(config.connections);
    send_config.block_size = block_size.unwrap_or(config.block_size);

    let (progress_tx, progress_rx) = mpsc::channel(64);
    let reporter = tokio::spawn(log_progress(progress_rx));

    let summary = TransferClient::send_file(&send_config, Some(progress_tx)).await?;
    let _ = reporter.await;

    tracing::info!(
        name = %summary.descriptor.name,
        bytes = summary.bytes_sent,
        elapsed_s = summary.elapsed.as_secs_f64(),
        speed_kbps = summary.throughput() / 1000.0,
        tunnels = summary.tunnels_connected(),
        digest = %summary.digest,
        "transfer done"
    );

    if !summary.is_complete() {
        bail!(
            "transfer incomplete: {} of {} bytes sent over {} tunnel(s)",
            summary.bytes_sent,
            summary.descriptor.total_size,
            summary.tunnels_connected()
        );
    }
    Ok(())
}

/// Logs progress each time another tenth of the file has gone out.
async fn log_progress(mut progress: mpsc::Receiver<Progress>) {
    let mut last_decile = 0u64;
    while let Some(p) = progress.recv().await {
        let decile = (p.percent() / 10.0) as u64;
        if decile > last_decile {
            last_decile = decile;
            tracing::info!(
                percent = p.percent(),
                speed_kbps = p.current_bps / 1000.0,
                "progress"
            );
        }
    }
}
