//! Batch scheduler
//!
//! Runs a list of outlets through the aggregator with a bounded worker pool
//! and checkpoints the progress file after every finished outlet.
//!
//! Outlets already recorded in the incoming [`ProgressState`] are skipped, as
//! are repeated ids in the input (the first occurrence wins). Each dispatched
//! outlet moves through `Pending -> InFlight -> {Complete, Partial, Failed}`;
//! an outlet cut short by cancellation ends the run as `Interrupted` and stays
//! pending in the progress file.

use crate::analysis::aggregator::FacilityAggregator;
use crate::analysis::progress::ProgressTracker;
use crate::analysis::SchedulerError;
use crate::config::AnalyzerConfig;
use crate::fetcher::RetryingClient;
use crate::resume::{ProgressState, ResumeError, RunLock};
use crate::shutdown::{self, SharedShutdown};
use crate::{Outlet, OutletStatus};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Outlets per worker used to size the pool when not configured
const OUTLETS_PER_WORKER: usize = 25;
/// Upper bound of the derived pool size
const MAX_DERIVED_WORKERS: usize = 8;

/// Pool size for `pending` outlets: `clamp(ceil(pending / 25), 1, 8)`
pub fn default_pool_size(pending: usize) -> usize {
    pending
        .div_ceil(OUTLETS_PER_WORKER)
        .clamp(1, MAX_DERIVED_WORKERS)
}

/// Aborts a spawned analysis when the run stops waiting for it
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Lifecycle of one outlet within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutletPhase {
    /// Not started
    Pending,
    /// Being analyzed
    InFlight,
    /// Every category counted
    Complete,
    /// Some categories failed
    Partial,
    /// Every category failed
    Failed,
    /// Cancelled mid-analysis; remains pending for the next run
    Interrupted,
}

impl OutletPhase {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            OutletPhase::Pending => "pending",
            OutletPhase::InFlight => "in_flight",
            OutletPhase::Complete => "complete",
            OutletPhase::Partial => "partial",
            OutletPhase::Failed => "failed",
            OutletPhase::Interrupted => "interrupted",
        }
    }

    /// Whether no further transition is allowed in this run
    pub fn is_final(&self) -> bool {
        !matches!(self, OutletPhase::Pending | OutletPhase::InFlight)
    }

    fn allows(&self, next: OutletPhase) -> bool {
        match self {
            OutletPhase::Pending => next == OutletPhase::InFlight,
            OutletPhase::InFlight => next.is_final(),
            _ => false,
        }
    }
}

impl From<OutletStatus> for OutletPhase {
    fn from(status: OutletStatus) -> Self {
        match status {
            OutletStatus::Complete => OutletPhase::Complete,
            OutletStatus::Partial => OutletPhase::Partial,
            OutletStatus::Failed => OutletPhase::Failed,
        }
    }
}

impl fmt::Display for OutletPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only phase tracking for the outlets of one run
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    phases: Arc<Mutex<HashMap<String, OutletPhase>>>,
}

impl RunLedger {
    /// Ledger with every id pending
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phases = ids
            .into_iter()
            .map(|id| (id.into(), OutletPhase::Pending))
            .collect();
        Self {
            phases: Arc::new(Mutex::new(phases)),
        }
    }

    /// Current phase; unknown ids are pending
    pub fn phase(&self, outlet_id: &str) -> OutletPhase {
        self.phases
            .lock()
            .get(outlet_id)
            .copied()
            .unwrap_or(OutletPhase::Pending)
    }

    /// Move an outlet forward
    pub fn transition(&self, outlet_id: &str, to: OutletPhase) -> Result<(), SchedulerError> {
        let mut phases = self.phases.lock();
        let phase = phases
            .entry(outlet_id.to_string())
            .or_insert(OutletPhase::Pending);
        if !phase.allows(to) {
            return Err(SchedulerError::InvalidTransition {
                outlet_id: outlet_id.to_string(),
                from: *phase,
                to,
            });
        }
        *phase = to;
        Ok(())
    }

    /// Number of outlets in a phase
    pub fn count(&self, phase: OutletPhase) -> usize {
        self.phases.lock().values().filter(|p| **p == phase).count()
    }
}

/// Counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Outlets in the input
    pub input: usize,
    /// Skipped because a previous run finished them
    pub already_completed: usize,
    /// Skipped because the id appeared earlier in the input
    pub duplicates: usize,
    /// Handed to the worker pool
    pub dispatched: usize,
    /// Finished complete
    pub complete: usize,
    /// Finished partial
    pub partial: usize,
    /// Finished failed
    pub failed: usize,
    /// Cancelled mid-analysis
    pub interrupted: usize,
}

impl RunCounts {
    /// Outlets that reached a terminal status in this run
    pub fn finished(&self) -> usize {
        self.complete + self.partial + self.failed
    }
}

/// Result of [`BatchScheduler::run`]
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Progress including every result recorded so far
    pub state: ProgressState,
    /// What happened in this run
    pub counts: RunCounts,
    /// Whether the run stopped early on request
    pub cancelled: bool,
}

/// Runs outlets through a [`FacilityAggregator`] with a bounded worker pool
pub struct BatchScheduler {
    aggregator: Arc<FacilityAggregator>,
    workers: Option<usize>,
    progress_path: Option<PathBuf>,
    shutdown: Option<SharedShutdown>,
    tracker: ProgressTracker,
    progress_bar: Option<ProgressBar>,
}

impl BatchScheduler {
    /// Create a scheduler that keeps progress in memory only
    pub fn new(aggregator: Arc<FacilityAggregator>) -> Self {
        Self {
            aggregator,
            workers: None,
            progress_path: None,
            shutdown: shutdown::get_global_shutdown(),
            tracker: ProgressTracker::default(),
            progress_bar: None,
        }
    }

    /// Build the aggregator and scheduler from configuration
    pub fn from_config(
        client: Arc<RetryingClient>,
        config: &AnalyzerConfig,
    ) -> Result<Self, SchedulerError> {
        let aggregator = FacilityAggregator::from_config(client, config)?;
        let mut scheduler =
            Self::new(Arc::new(aggregator)).with_progress_file(config.progress_path.clone());
        scheduler.workers = config.concurrency.workers;
        Ok(scheduler)
    }

    /// Fix the worker pool size
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Checkpoint to a progress file after every finished outlet
    pub fn with_progress_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.progress_path = Some(path.into());
        self
    }

    /// Attach a shared shutdown handle for cooperative cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override the `[PROGRESS]` log cadence
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Drive a terminal progress bar
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Aggregator in use
    pub fn aggregator(&self) -> &Arc<FacilityAggregator> {
        &self.aggregator
    }

    /// Run a batch
    ///
    /// Returns the updated state even when cancelled. Progress I/O errors
    /// abort the run; results recorded before the failure are on disk.
    pub async fn run(
        &self,
        outlets: &[Outlet],
        state: ProgressState,
    ) -> Result<BatchOutcome, SchedulerError> {
        let span = info_span!("batch_run", outlets = outlets.len());
        self.run_inner(outlets, state).instrument(span).await
    }

    async fn run_inner(
        &self,
        outlets: &[Outlet],
        mut state: ProgressState,
    ) -> Result<BatchOutcome, SchedulerError> {
        let mut run_lock = match &self.progress_path {
            Some(path) => Some(RunLock::open(path)?),
            None => None,
        };
        let _run_guard = match run_lock.as_mut() {
            Some(lock) => Some(lock.try_exclusive()?),
            None => None,
        };

        let mut counts = RunCounts {
            input: outlets.len(),
            ..RunCounts::default()
        };
        let mut seen = HashSet::new();
        let mut pending: Vec<&Outlet> = Vec::new();
        for outlet in outlets {
            if !seen.insert(outlet.id.as_str()) {
                counts.duplicates += 1;
                warn!(outlet_id = %outlet.id, "Duplicate outlet id in input, keeping first");
            } else if state.is_completed(&outlet.id) {
                counts.already_completed += 1;
            } else {
                pending.push(outlet);
            }
        }

        let workers = self
            .workers
            .unwrap_or_else(|| default_pool_size(pending.len()));
        info!(
            pending = pending.len(),
            already_completed = counts.already_completed,
            workers,
            "Starting batch"
        );

        let ledger = RunLedger::new(pending.iter().map(|outlet| outlet.id.clone()));
        let mut progress = self.tracker.start(pending.len());
        if let Some(bar) = &self.progress_bar {
            bar.set_length(pending.len() as u64);
        }

        let mut results = stream::iter(pending.iter().copied())
            .take_while(|_| futures::future::ready(!self.shutdown_requested()))
            .map(|outlet| {
                let ledger = ledger.clone();
                let aggregator = Arc::clone(&self.aggregator);
                async move {
                    ledger.transition(&outlet.id, OutletPhase::InFlight)?;
                    // Own task, so fetches keep running while a checkpoint is written
                    let owned = outlet.clone();
                    let task = tokio::spawn(
                        async move { aggregator.analyze(&owned).await }.in_current_span(),
                    );
                    let _abort = AbortOnDrop(task.abort_handle());
                    let outcome = task.await.map_err(|e| SchedulerError::Task {
                        outlet_id: outlet.id.clone(),
                        reason: e.to_string(),
                    })?;
                    Ok::<_, SchedulerError>((outlet, outcome))
                }
            })
            .buffer_unordered(workers);

        while let Some(item) = results.next().await {
            let (outlet, outcome) = item?;
            counts.dispatched += 1;

            let result = match outcome {
                Ok(result) => result,
                Err(interrupted) => {
                    ledger.transition(&outlet.id, OutletPhase::Interrupted)?;
                    counts.interrupted += 1;
                    debug!(outlet_id = %interrupted.outlet_id, "Outlet left pending");
                    continue;
                }
            };

            ledger.transition(&outlet.id, OutletPhase::from(result.status))?;
            match result.status {
                OutletStatus::Complete => counts.complete += 1,
                OutletStatus::Partial => counts.partial += 1,
                OutletStatus::Failed => counts.failed += 1,
            }
            let failed = result.status == OutletStatus::Failed;
            state.record(result);
            state = self.checkpoint(state).await?;

            progress.update(failed);
            if let Some(bar) = &self.progress_bar {
                bar.inc(1);
                bar.set_message(outlet.name.clone());
            }
            if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }
        }
        drop(results);

        let cancelled = self.shutdown_requested();
        state = self.checkpoint(state).await?;
        if let Some(bar) = &self.progress_bar {
            bar.finish_and_clear();
        }

        if cancelled {
            warn!(
                finished = counts.finished(),
                remaining = pending.len() - counts.finished(),
                "Batch cancelled; unfinished outlets stay pending"
            );
        } else {
            info!(
                complete = counts.complete,
                partial = counts.partial,
                failed = counts.failed,
                "Batch finished"
            );
        }

        Ok(BatchOutcome {
            state,
            counts,
            cancelled,
        })
    }

    /// Save on a blocking thread, handing the state back afterwards
    async fn checkpoint(&self, state: ProgressState) -> Result<ProgressState, SchedulerError> {
        let Some(path) = self.progress_path.clone() else {
            return Ok(state);
        };
        let (state, saved) = tokio::task::spawn_blocking(move || {
            let saved = state.save(&path);
            (state, saved)
        })
        .await
        .map_err(|e| ResumeError::IoError(format!("checkpoint task failed: {e}")))?;
        saved?;
        Ok(state)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
