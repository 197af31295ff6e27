//! Main entry point for the outlet-analyzer CLI

use clap::Parser;
use outlet_facility_analyzer::cli::{Cli, Commands};
use outlet_facility_analyzer::metrics;
use outlet_facility_analyzer::shutdown::{self, ShutdownCoordinator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
///
/// Logs go to stderr so that `--output-format json` keeps stdout parseable.
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("outlet_facility_analyzer=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::spawn_ctrl_c_handler(shutdown.clone());

    if let Some(addr) = cli.metrics_addr {
        match metrics::init_metrics(addr).await {
            Ok(()) => info!(%addr, "Metrics endpoint listening"),
            Err(e) => error!(%addr, error = %e, "Failed to start metrics endpoint"),
        }
    }

    let result = match cli.command {
        Commands::Analyze(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Categories(ref cmd) => cmd.execute(&cli).map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(ref cmd) => cmd.execute(&cli).map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
