//! Validate command implementation

use super::{Cli, CliError, OutputFormat};
use crate::cache::QueryCache;
use crate::config::AnalyzerConfig;
use crate::resume::ProgressState;
use clap::{Args, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Validate a configuration, progress or cache file
#[derive(Args, Debug, Clone)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Validation targets
#[derive(Subcommand, Debug, Clone)]
pub enum ValidateTarget {
    /// Check a TOML configuration file
    Config {
        /// File to check; falls back to `--config`
        path: Option<PathBuf>,
    },

    /// Check a progress file
    Progress {
        /// File to check; falls back to the configured progress path
        path: Option<PathBuf>,
    },

    /// Check a query cache file
    Cache {
        /// File to check; falls back to the configured cache path
        path: Option<PathBuf>,
    },
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Config { path } => {
                let path = path.clone().or_else(|| cli.config.clone()).ok_or_else(|| {
                    CliError::InvalidArgument("no configuration file given".to_string())
                })?;
                validate_config(cli.output_format, &path)
            }
            ValidateTarget::Progress { path } => {
                let path = match path {
                    Some(path) => path.clone(),
                    None => cli.load_config()?.progress_path,
                };
                validate_progress(cli.output_format, &path)
            }
            ValidateTarget::Cache { path } => {
                let path = match path {
                    Some(path) => path.clone(),
                    None => cli.load_config()?.cache.path,
                };
                validate_cache(cli.output_format, &path)
            }
        }
    }
}

fn validate_config(format: OutputFormat, path: &Path) -> Result<(), CliError> {
    let config = AnalyzerConfig::load(path)?;
    let table = config.category_table()?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "valid": true,
            "endpoints": config.endpoints.len(),
            "categories": table.iter().count(),
            "escalation": config.escalation.as_str(),
            "rating_tiers": config.rating.tiers().len(),
        }))?,
        OutputFormat::Human => {
            println!("Configuration valid: {}", path.display());
            println!("  Endpoints:    {}", config.endpoints.len());
            println!("  Categories:   {}", table.iter().count());
            println!("  Escalation:   {}", config.escalation.as_str());
            println!("  Rating tiers: {}", config.rating.tiers().len());
        }
    }
    Ok(())
}

fn validate_progress(format: OutputFormat, path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::Validation(format!(
            "progress file {} does not exist",
            path.display()
        )));
    }
    let state = ProgressState::load(path)?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "valid": true,
            "schema_version": state.schema_version(),
            "run_fingerprint": state.fingerprint(),
            "completed": state.completed_count(),
            "last_checkpoint_at": state.last_checkpoint_at(),
        }))?,
        OutputFormat::Human => {
            println!("Progress file valid: {}", path.display());
            println!("  Schema version:  {}", state.schema_version());
            println!("  Run fingerprint: {}", state.fingerprint());
            println!("  Completed:       {}", state.completed_count());
        }
    }
    Ok(())
}

fn validate_cache(format: OutputFormat, path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::Validation(format!(
            "cache file {} does not exist",
            path.display()
        )));
    }
    let cache = QueryCache::open(path);
    let stats = cache.stats();

    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "valid": stats.corrupt_lines == 0,
            "entries": stats.entries,
            "corrupt_lines": stats.corrupt_lines,
        }))?,
        OutputFormat::Human => {
            println!("Cache file: {}", path.display());
            println!("  Entries:       {}", stats.entries);
            println!("  Corrupt lines: {}", stats.corrupt_lines);
        }
    }

    if stats.corrupt_lines > 0 {
        return Err(CliError::Validation(format!(
            "{} malformed line(s) in {}",
            stats.corrupt_lines,
            path.display()
        )));
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::InvalidArgument(format!("JSON serialization failed: {e}")))?;
    println!("{json}");
    Ok(())
}
