//! CLI command implementations

pub mod analyze;
pub mod categories;
pub mod error;
pub mod input;
pub mod validate;

pub use analyze::AnalyzeArgs;
pub use categories::CategoriesCommand;
pub use error::CliError;
pub use validate::{ValidateCommand, ValidateTarget};

use crate::config::AnalyzerConfig;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

/// Largest accepted worker pool
const MAX_WORKERS: usize = 64;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Outlet facility analyzer
#[derive(Parser, Debug)]
#[command(name = "outlet-analyzer", version, about = "Rate outlet locations by nearby facilities")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Load the configuration named by `--config`, or the defaults
    pub fn load_config(&self) -> Result<AnalyzerConfig, CliError> {
        match &self.config {
            Some(path) => {
                let config = AnalyzerConfig::load(path)?;
                info!(path = %path.display(), "Configuration loaded");
                Ok(config)
            }
            None => Ok(AnalyzerConfig::default()),
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze facilities around a list of outlets
    Analyze(AnalyzeArgs),

    /// Show the configured facility categories
    Categories(CategoriesCommand),

    /// Validate a configuration, progress or cache file
    Validate(ValidateCommand),
}

/// Parse and bound the worker count
pub(crate) fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}
