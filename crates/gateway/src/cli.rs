//! Command-line interface for the `groundline` binary.

use clap::{Parser, Subcommand};
use gl_domain::config::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "groundline", about = "Grounded conversational QA gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "groundline.toml")]
    pub config: PathBuf,

    /// Override the listen port.
    #[arg(long, global = true)]
    pub port: Option<u16>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (default).
    Serve,
    /// Print the version and exit.
    Version,
}

/// Load the config file, falling back to defaults when it is absent.
pub fn load_config(path: &std::path::Path, port: Option<u16>) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        Config::from_toml(&raw)?
    } else {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        Config::default()
    };
    if let Some(port) = port {
        config.server.port = port;
    }
    Ok(config)
}
