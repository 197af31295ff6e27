//! CLI error types and conversions

use crate::analysis::SchedulerError;
use crate::competitor::CompetitorError;
use crate::config::ConfigError;
use crate::fetcher::endpoint_pool::EndpointPoolError;
use crate::report::ReportError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Batch run error
    #[error("analysis error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Progress file error
    #[error("progress error: {0}")]
    Resume(#[from] ResumeError),

    /// Report export error
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// Competitor file error
    #[error("competitor error: {0}")]
    Competitor(#[from] CompetitorError),

    /// Endpoint pool error
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointPoolError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Outlet input could not be used
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A validated file has problems
    #[error("validation failed: {0}")]
    Validation(String),

    /// The run was cancelled before every outlet finished
    #[error("run interrupted with {pending} outlet(s) still pending; rerun to resume")]
    Interrupted {
        /// Outlets without a result
        pending: usize,
    },
}
