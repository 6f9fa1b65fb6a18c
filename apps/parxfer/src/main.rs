//! parxfer entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parxfer")]
#[command(version, about = "Send one file over many TCP connections", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive files into the output directory
    Server {
        /// Port to listen on
        port: Option<u16>,

        /// Directory for received files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Send a file to a running server
    Client {
        /// Server address, HOST or HOST:PORT
        address: String,

        /// File to send
        file: PathBuf,

        /// Number of parallel connections
        connections: Option<usize>,

        /// Block size in bytes
        block_size: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting parxfer");

    let config = config::Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Server { port, output_dir } => {
            rt.block_on(app::run_server(config, port, output_dir))
        }
        Command::Client {
            address,
            file,
            connections,
            block_size,
        } => rt.block_on(app::run_client(config, address, file, connections, block_size)),
    }
}
