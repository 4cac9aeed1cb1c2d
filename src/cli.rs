//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Authenticating reverse proxy for the Cromwell workflow engine
#[derive(Parser, Debug)]
#[command(name = "cromwell-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CROMWELL_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CROMWELL_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CROMWELL_PROXY_HOST")]
    pub host: Option<String>,

    /// Base URL of the workflow server
    #[arg(short, long, env = "CROMWELL_PROXY_UPSTREAM_URL", global = true)]
    pub upstream: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CROMWELL_PROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, env = "CROMWELL_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Name understood by [`crate::setup_tracing`]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the proxy (default)
    Serve,

    /// Print the effective route table and exit
    Routes,

    /// Load and validate configuration, then exit
    CheckConfig,
}
