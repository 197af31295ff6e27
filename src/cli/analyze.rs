//! Analyze command implementation

use super::{input, parse_workers, Cli, CliError, OutputFormat};
use crate::analysis::{BatchOutcome, BatchScheduler, RateLimiter};
use crate::cache::QueryCache;
use crate::competitor::CompetitorIndex;
use crate::config::AnalyzerConfig;
use crate::fetcher::{EndpointPool, OverpassProvider, RetryingClient};
use crate::report::AnalysisReport;
use crate::resume::{compute_fingerprint, ProgressState, ResumeMode, ResumeOutcome};
use crate::shutdown::SharedShutdown;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Default report file
pub const DEFAULT_REPORT_FILE: &str = "outlet_analysis_report.json";

/// Analyze facilities around a list of outlets
#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Outlet list (CSV with a header row, or a JSON array)
    #[arg(long)]
    pub outlets: PathBuf,

    /// Report file to write
    #[arg(long, default_value = DEFAULT_REPORT_FILE)]
    pub output: PathBuf,

    /// Resume behavior for an existing progress file
    #[arg(long, value_enum, default_value = "on")]
    pub resume: ResumeMode,

    /// Progress file (overrides the configured path)
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Concurrent outlets (1-64); derived from the dataset size when omitted
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Competitor store list (JSON)
    #[arg(long)]
    pub competitors: Option<PathBuf>,

    /// Competitor search radius in kilometers
    #[arg(long)]
    pub competitor_radius_km: Option<f64>,

    /// Keep query results in memory only
    #[arg(long)]
    pub no_cache: bool,

    /// Hide the terminal progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Summary printed after a run
#[derive(Debug, Serialize)]
struct AnalyzeSummary<'a> {
    report: &'a Path,
    progress_file: &'a Path,
    input: usize,
    already_completed: usize,
    duplicates: usize,
    complete: usize,
    partial: usize,
    failed: usize,
    pending: usize,
    cancelled: bool,
}

impl AnalyzeArgs {
    /// Execute the analyze command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let config = self.resolve_config(cli)?;

        let outlets = input::load_outlets(&self.outlets)?;
        if outlets.is_empty() {
            return Err(CliError::InvalidInput(format!(
                "{} contains no usable outlets",
                self.outlets.display()
            )));
        }

        let fingerprint = compute_fingerprint(&outlets, &config.fingerprint_material()?);
        let (state, resume_outcome) =
            ProgressState::load_or_fresh(&config.progress_path, &fingerprint, self.resume)?;
        report_resume(&resume_outcome, &config.progress_path);

        let cache = Arc::new(self.open_cache(&config)?);
        let provider = OverpassProvider::new(&config.retry)
            .map_err(|e| CliError::HttpClient(e.to_string()))?;
        let pool = EndpointPool::from_config(&config)?;
        let limiter = RateLimiter::from_config(&config.concurrency);
        let client = RetryingClient::new(
            Arc::new(provider),
            Arc::new(pool),
            Arc::new(limiter),
            Arc::clone(&cache),
            config.retry_policy(),
        )
        .with_raw_items(config.cache.store_raw_items)
        .with_shutdown(shutdown.clone());

        let mut scheduler =
            BatchScheduler::from_config(Arc::new(client), &config)?.with_shutdown(shutdown);
        if cli.output_format == OutputFormat::Human && !self.no_progress {
            scheduler = scheduler.with_progress_bar(progress_bar());
        }

        let outcome = scheduler.run(&outlets, state).await?;

        let stats = cache.stats();
        info!(
            entries = stats.entries,
            hits = stats.hits,
            misses = stats.misses,
            "Query cache usage"
        );

        let competitors = match self
            .competitors
            .as_ref()
            .or(config.competitors.path.as_ref())
        {
            Some(path) => Some(CompetitorIndex::load(path)?),
            None => None,
        };
        let report = AnalysisReport::build(
            &outlets,
            &outcome.state,
            competitors.as_ref(),
            config.competitors.radius_km,
        );
        report.save(&self.output)?;

        self.print_summary(cli.output_format, &config, &outcome, report.summary.pending)?;

        if outcome.cancelled {
            return Err(CliError::Interrupted {
                pending: report.summary.pending,
            });
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded configuration
    fn resolve_config(&self, cli: &Cli) -> Result<AnalyzerConfig, CliError> {
        let mut config = cli.load_config()?;
        if let Some(path) = &self.progress_file {
            config.progress_path = path.clone();
        }
        if let Some(workers) = self.workers {
            config.concurrency.workers = Some(workers);
        }
        if let Some(radius) = self.competitor_radius_km {
            config.competitors.radius_km = radius;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn open_cache(&self, config: &AnalyzerConfig) -> Result<QueryCache, CliError> {
        if !config.cache.enabled {
            info!("Query cache kept in memory only");
            return Ok(QueryCache::in_memory());
        }

        let cache = QueryCache::open(&config.cache.path);
        let active: HashSet<String> = config.category_table()?.active_versions().into_iter().collect();
        cache.retain_versions(&active);
        if cache.needs_compaction() {
            if let Err(e) = cache.compact() {
                warn!(error = %e, "Cache compaction failed, continuing with the existing file");
            }
        }
        Ok(cache)
    }

    fn print_summary(
        &self,
        format: OutputFormat,
        config: &AnalyzerConfig,
        outcome: &BatchOutcome,
        pending: usize,
    ) -> Result<(), CliError> {
        let counts = &outcome.counts;
        match format {
            OutputFormat::Json => {
                let summary = AnalyzeSummary {
                    report: &self.output,
                    progress_file: &config.progress_path,
                    input: counts.input,
                    already_completed: counts.already_completed,
                    duplicates: counts.duplicates,
                    complete: counts.complete,
                    partial: counts.partial,
                    failed: counts.failed,
                    pending,
                    cancelled: outcome.cancelled,
                };
                let json = serde_json::to_string_pretty(&summary)
                    .map_err(|e| CliError::InvalidArgument(format!("JSON serialization failed: {e}")))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("Outlets in input:    {}", counts.input);
                if counts.duplicates > 0 {
                    println!("Duplicate ids:       {}", counts.duplicates);
                }
                println!("Already completed:   {}", counts.already_completed);
                println!("Complete:            {}", counts.complete);
                println!("Partial:             {}", counts.partial);
                println!("Failed:              {}", counts.failed);
                println!("Pending:             {pending}");
                println!();
                println!("Report written to {}", self.output.display());
                if outcome.cancelled {
                    println!(
                        "Run interrupted. Rerun the same command to resume from {}",
                        config.progress_path.display()
                    );
                }
            }
        }
        Ok(())
    }
}

fn report_resume(outcome: &ResumeOutcome, path: &Path) {
    match outcome {
        ResumeOutcome::Fresh => info!(path = %path.display(), "Starting a fresh run"),
        ResumeOutcome::Resumed { completed } => {
            info!(path = %path.display(), completed, "Resuming previous run")
        }
        ResumeOutcome::FingerprintChanged => warn!(
            path = %path.display(),
            "Outlets or configuration changed since the progress file was written, starting fresh"
        ),
        ResumeOutcome::MovedAside { to } => warn!(
            path = %path.display(),
            moved_to = %to.display(),
            "Progress file was unreadable and has been moved aside"
        ),
        ResumeOutcome::Reset => info!(path = %path.display(), "Progress reset"),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    match ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => warn!(error = %e, "Invalid progress bar template, using default style"),
    }
    bar
}
