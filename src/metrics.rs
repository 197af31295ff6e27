//! Production observability metrics for the facility analyzer
//!
//! Tracks query volume and latency per endpoint, retries and backoff,
//! cache effectiveness, admission queueing and outlet outcomes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade; recording is a no-op until an exporter is installed
//! - Optional Prometheus exporter for a scrape endpoint (e.g. `:9090/metrics`)
//! - Helpers are synchronous and cheap so they can sit on the request path

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::OutletStatus;

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID generator for query tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics with a Prometheus exporter
///
/// Idempotent: later calls are ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "facility_queries_total",
        Unit::Count,
        "Network attempts made against Overpass endpoints"
    );

    describe_histogram!(
        "facility_query_duration_seconds",
        Unit::Seconds,
        "Duration of a single network attempt"
    );

    describe_counter!(
        "facility_retries_total",
        Unit::Count,
        "Retry attempts after a retryable failure"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff applied before a retry"
    );

    describe_counter!(
        "query_cache_hits_total",
        Unit::Count,
        "Facility queries answered from the cache"
    );

    describe_counter!(
        "query_cache_misses_total",
        Unit::Count,
        "Facility queries not found in the cache"
    );

    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for an endpoint admission permit"
    );

    describe_counter!(
        "outlets_analyzed_total",
        Unit::Count,
        "Outlets that reached a terminal status"
    );

    describe_counter!(
        "progress_checkpoints_total",
        Unit::Count,
        "Progress file saves"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the exporter has been installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for query tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("q-{id:08x}")
}

/// Timing and outcome of one network attempt
pub struct QueryMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl QueryMetrics {
    /// Start timing an attempt
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting facility query"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self, facility_count: u32) {
        let duration = self.record("ok");
        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            facility_count = facility_count,
            duration_ms = duration.as_millis(),
            "Facility query completed"
        );
    }

    /// Record a failed attempt under an error label
    pub fn record_failure(&self, label: &'static str) {
        let duration = self.record(label);
        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            outcome = label,
            duration_ms = duration.as_millis(),
            "Facility query attempt failed"
        );
    }

    /// Correlation ID of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn record(&self, outcome: &'static str) -> Duration {
        let duration = self.start_time.elapsed();
        counter!(
            "facility_queries_total",
            "endpoint" => self.endpoint.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(
            "facility_query_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());
        duration
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("facility_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record a cache lookup
pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("query_cache_hits_total").increment(1);
    } else {
        counter!("query_cache_misses_total").increment(1);
    }
}

/// Rate limiter queue-wait measurement
pub struct RateLimiterMetrics {
    start_time: Instant,
}

impl RateLimiterMetrics {
    /// Start measuring queue wait time
    pub fn start_acquire() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Record the permit acquisition for an endpoint
    pub fn record_acquired(self, endpoint: &str) {
        let wait_duration = self.start_time.elapsed();
        histogram!(
            "rate_limit_queue_wait_seconds",
            "endpoint" => endpoint.to_string(),
        )
        .record(wait_duration.as_secs_f64());

        if wait_duration.as_millis() > 100 {
            debug!(
                endpoint = endpoint,
                wait_ms = wait_duration.as_millis(),
                "Endpoint permit acquired after wait"
            );
        }
    }
}

/// Outlet analysis timing
pub struct OutletMetrics {
    outlet_id: String,
    start_time: Instant,
}

impl OutletMetrics {
    /// Start tracking an outlet
    pub fn start(outlet_id: impl Into<String>) -> Self {
        Self {
            outlet_id: outlet_id.into(),
            start_time: Instant::now(),
        }
    }

    /// Record the terminal status of the outlet
    pub fn record(&self, status: OutletStatus, categories_present: u8) {
        counter!("outlets_analyzed_total", "status" => status.as_str()).increment(1);
        debug!(
            outlet_id = %self.outlet_id,
            status = %status,
            categories_present = categories_present,
            duration_ms = self.start_time.elapsed().as_millis(),
            "Outlet analysis recorded"
        );
    }
}

/// Record a progress file save
pub fn record_checkpoint() {
    counter!("progress_checkpoints_total").increment(1);
}
