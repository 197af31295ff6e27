//! Integration tests for the Prometheus metrics endpoint
//!
//! The exporter installs a process-wide recorder, so everything that needs
//! the endpoint runs inside a single test.

use outlet_facility_analyzer::metrics::{
    self, record_checkpoint, record_retry_backoff, OutletMetrics, QueryMetrics, RateLimiterMetrics,
};
use outlet_facility_analyzer::OutletStatus;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

/// Helper to fetch metrics text from endpoint
async fn fetch_metrics_text(addr: &str) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("http://{}/metrics", addr);
    let resp = reqwest::get(&url).await?;
    Ok(resp.text().await?)
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_analysis_metrics() {
    let addr: SocketAddr = "127.0.0.1:19190".parse().unwrap();

    assert!(metrics::init_metrics(addr).await.is_ok());
    // Idempotent
    assert!(metrics::init_metrics(addr).await.is_ok());
    assert!(metrics::is_initialized().await);
    sleep(Duration::from_millis(100)).await;

    let ok = QueryMetrics::start("http://endpoint-0.test/api/interpreter", 1);
    ok.record_success(4);
    let failed = QueryMetrics::start("http://endpoint-1.test/api/interpreter", 2);
    failed.record_failure("rate_limited");

    record_retry_backoff(Duration::from_millis(500), 1);
    RateLimiterMetrics::start_acquire().record_acquired("http://endpoint-0.test/api/interpreter");
    OutletMetrics::start("OUT-001").record(OutletStatus::Complete, 6);
    record_checkpoint();

    let text = fetch_metrics_text("127.0.0.1:19190").await.unwrap();

    assert!(text.contains("facility_queries_total"));
    assert!(text.contains("facility_query_duration_seconds"));
    assert!(text.contains("facility_retries_total"));
    assert!(text.contains("retry_backoff_duration_seconds"));
    assert!(text.contains("rate_limit_queue_wait_seconds"));
    assert!(text.contains("outlets_analyzed_total"));
    assert!(text.contains("progress_checkpoints_total"));
}

#[test]
fn test_correlation_id_uniqueness() {
    let id1 = metrics::generate_correlation_id();
    let id2 = metrics::generate_correlation_id();
    let id3 = metrics::generate_correlation_id();

    assert_ne!(id1, id2);
    assert_ne!(id2, id3);
    assert_ne!(id1, id3);
    assert!(id1.starts_with("q-"));
}
