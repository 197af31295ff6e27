//! Facility analysis engine
//!
//! This module turns outlet coordinates into rated facility results.
//!
//! # Overview
//!
//! 1. **Scheduling**: [`scheduler::BatchScheduler`] runs outlets with a bounded worker pool
//! 2. **Aggregation**: [`aggregator::FacilityAggregator`] resolves all categories of one outlet
//! 3. **Admission**: [`rate_limit::RateLimiter`] caps concurrent attempts per endpoint
//! 4. **Rating**: [`rating::RatingTable`] maps categories present to stars
//! 5. **Resume**: every finished outlet is checkpointed before the next is consumed
//!
//! # Error Handling
//!
//! Category failures are recorded in the outlet result rather than raised.
//! The scheduler's caller only sees [`SchedulerError`]: progress I/O,
//! configuration, or an internal state-machine violation.

pub mod aggregator;
pub mod progress;
pub mod rate_limit;
pub mod rating;
pub mod scheduler;

pub use aggregator::{AnalysisInterrupted, CategoryOutcome, FacilityAggregator};
pub use progress::{BatchProgress, ProgressTracker};
pub use rate_limit::{EndpointPermit, RateLimitError, RateLimiter};
pub use rating::{RatingTable, RatingTableError, RatingTier};
pub use scheduler::{default_pool_size, BatchOutcome, BatchScheduler, OutletPhase, RunCounts, RunLedger};

use crate::config::ConfigError;
use crate::resume::ResumeError;

/// Errors that abort a batch run
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Progress file could not be locked or saved
    #[error("progress store error: {0}")]
    Progress(#[from] ResumeError),

    /// Engine could not be built from configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An outlet moved backwards or skipped a state
    #[error("invalid state transition for outlet {outlet_id}: {from} -> {to}")]
    InvalidTransition {
        /// Outlet concerned
        outlet_id: String,
        /// Current phase
        from: OutletPhase,
        /// Requested phase
        to: OutletPhase,
    },

    /// An outlet analysis task panicked
    #[error("analysis task for outlet {outlet_id} failed: {reason}")]
    Task {
        /// Outlet concerned
        outlet_id: String,
        /// Join error detail
        reason: String,
    },
}
