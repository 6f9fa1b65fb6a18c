//! Persistent defaults for both roles.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/parxfer/config.toml`
//! - Windows: `%APPDATA%/parxfer/config.toml`
//!
//! Command-line arguments take precedence over every value here.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use parxfer_protocol::{DEFAULT_BLOCK_SIZE, DEFAULT_CONNECTIONS, DEFAULT_PORT};

/// Settings shared by `server` and `client`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port the server listens on and the client dials when none is given.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory where the server writes received files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Parallel connections per outgoing transfer.
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Block size in bytes for outgoing transfers.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_connections() -> usize {
    DEFAULT_CONNECTIONS
}

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            output_dir: default_output_dir(),
            connections: default_connections(),
            block_size: default_block_size(),
        }
    }
}

impl Config {
    /// Loads `path`, or the platform default location when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&config_path()),
        }
    }

    /// Reads a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("parxfer").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("parxfer")
            .join("config.toml")
    }
}
