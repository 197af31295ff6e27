//! Unit tests for analyze command argument parsing

use clap::Parser;
use outlet_facility_analyzer::cli::{Cli, Commands, OutputFormat};
use outlet_facility_analyzer::resume::ResumeMode;
use std::path::PathBuf;

fn analyze_args(cli: Cli) -> outlet_facility_analyzer::cli::AnalyzeArgs {
    match cli.command {
        Commands::Analyze(args) => args,
        other => panic!("expected analyze, got {other:?}"),
    }
}

#[test]
fn test_analyze_defaults() {
    let cli = Cli::parse_from(["outlet-analyzer", "analyze", "--outlets", "outlets.csv"]);
    assert_eq!(cli.output_format, OutputFormat::Human);
    assert!(cli.config.is_none());

    let args = analyze_args(cli);
    assert_eq!(args.resume, ResumeMode::On);
    assert_eq!(args.workers, None);
    assert_eq!(args.output, PathBuf::from("outlet_analysis_report.json"));
    assert!(!args.no_cache);
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::parse_from([
        "outlet-analyzer",
        "analyze",
        "--outlets",
        "outlets.json",
        "--config",
        "analyzer.toml",
        "--metrics-addr",
        "127.0.0.1:9464",
        "--resume",
        "off",
    ]);
    assert_eq!(cli.config, Some(PathBuf::from("analyzer.toml")));
    assert_eq!(cli.metrics_addr.map(|a| a.port()), Some(9464));
    assert_eq!(analyze_args(cli).resume, ResumeMode::Off);
}

#[test]
fn test_worker_bounds() {
    assert!(Cli::try_parse_from(["outlet-analyzer", "analyze", "--outlets", "o.csv", "--workers", "64"]).is_ok());
    assert!(Cli::try_parse_from(["outlet-analyzer", "analyze", "--outlets", "o.csv", "--workers", "65"]).is_err());
}

#[test]
fn test_outlets_required() {
    assert!(Cli::try_parse_from(["outlet-analyzer", "analyze"]).is_err());
}
