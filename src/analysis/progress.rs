//! Periodic progress lines for long batch runs.
//!
//! The scheduler reports `[PROGRESS]` lines either when another 10 % of the
//! batch is done or, for slow batches, at a fixed time interval.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// Controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Start tracking a batch of `total` outlets.
    pub fn start(&self, total: usize) -> BatchProgress {
        let now = Instant::now();
        BatchProgress {
            analyzed: 0,
            failed: 0,
            total,
            start_time: now,
            last_update: now,
            update_interval: self.update_interval,
            last_reported_percentage: 0.0,
            min_percentage_step: self.min_percentage_step,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Running counters of one batch.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Outlets finished in this run (any terminal status).
    pub analyzed: usize,
    /// Of those, outlets whose every category failed.
    pub failed: usize,
    /// Outlets dispatched in this run.
    pub total: usize,
    start_time: Instant,
    last_update: Instant,
    update_interval: Duration,
    last_reported_percentage: f64,
    min_percentage_step: f64,
}

impl BatchProgress {
    /// Count one finished outlet.
    pub fn update(&mut self, failed: bool) {
        self.analyzed = self.analyzed.saturating_add(1);
        if failed {
            self.failed = self.failed.saturating_add(1);
        }
    }

    /// Whether a line should be emitted, by percentage step or elapsed time.
    pub fn should_emit_update(&self) -> bool {
        if self.analyzed == 0 {
            return false;
        }
        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.analyzed as f64 / self.total as f64) * 100.0
    }

    /// Outlets per minute so far.
    pub fn rate_per_minute(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.analyzed as f64 / elapsed * 60.0
    }

    /// Estimated time to finish the batch.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let remaining = self.total.saturating_sub(self.analyzed);
        if remaining == 0 || self.analyzed == 0 {
            return None;
        }
        let per_outlet = self.start_time.elapsed().as_secs_f64() / self.analyzed as f64;
        Some(Duration::from_secs_f64(per_outlet * remaining as f64))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Analyzed {}/{} outlets - {:.1}% complete",
            self.analyzed,
            self.total,
            self.percentage()
        )];

        if self.failed > 0 {
            parts.push(format!("({} failed)", self.failed));
        }

        let rate = self.rate_per_minute();
        if rate > 0.0 {
            parts.push(format!("at {rate:.1} outlets/min"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
