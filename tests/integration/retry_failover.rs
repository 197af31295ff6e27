//! Integration tests for cache-first fetching, bounded retries and endpoint failover

use crate::support::{self, endpoint_url, fast_policy, ScriptedProvider};
use outlet_facility_analyzer::config::CategoryTable;
use outlet_facility_analyzer::fetcher::{AttemptErrorType, FacilityQuery, FetchErrorKind};
use outlet_facility_analyzer::FacilityCategory;
use std::sync::Arc;
use std::time::Duration;

fn culinary_query(latitude: f64, longitude: f64) -> FacilityQuery {
    CategoryTable::defaults()
        .get(FacilityCategory::Culinary)
        .unwrap()
        .query(latitude, longitude, 100)
}

#[tokio::test]
async fn test_succeeds_after_failures_on_same_endpoint() {
    let provider = Arc::new(ScriptedProvider::constant(3).with_script(vec![
        Err(AttemptErrorType::ServerError(504)),
        Err(AttemptErrorType::NetworkTimeout),
    ]));
    let client = support::client(provider.clone(), 2, fast_policy(3, 8), support::shutdown());

    let found = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap();

    assert_eq!(found.count, 3);
    assert_eq!(found.attempts, 3);
    assert!(!found.from_cache);
    assert!(provider
        .calls()
        .iter()
        .all(|call| call.endpoint == endpoint_url(0)));
}

#[tokio::test]
async fn test_fails_over_after_per_endpoint_budget() {
    let provider = Arc::new(ScriptedProvider::constant(5).with_script(vec![
        Err(AttemptErrorType::ServerError(503)),
        Err(AttemptErrorType::ServerError(503)),
        Err(AttemptErrorType::RateLimit),
    ]));
    let client = support::client(provider.clone(), 3, fast_policy(3, 8), support::shutdown());

    let found = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap();

    assert_eq!(found.count, 5);
    assert_eq!(found.attempts, 4);
    let calls = provider.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[2].endpoint, endpoint_url(0));
    assert_eq!(calls[3].endpoint, endpoint_url(1));
}

#[tokio::test]
async fn test_malformed_query_is_not_retried() {
    let provider =
        Arc::new(ScriptedProvider::constant(1).with_script(vec![Err(AttemptErrorType::InvalidQuery)]));
    let client = support::client(provider.clone(), 3, fast_policy(3, 8), support::shutdown());

    let err = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::MalformedQuery);
    assert_eq!(err.attempts, 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_unparseable_body_is_not_retried() {
    let provider = Arc::new(
        ScriptedProvider::constant(1).with_script(vec![Err(AttemptErrorType::MalformedResponse)]),
    );
    let client = support::client(provider.clone(), 3, fast_policy(3, 8), support::shutdown());

    let err = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::MalformedQuery);
    assert_eq!(err.attempts, 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_every_endpoint_failing_is_exhaustion() {
    let provider = Arc::new(ScriptedProvider::new(|_, _| Err(AttemptErrorType::NetworkTimeout)));
    let client = support::client(provider.clone(), 2, fast_policy(2, 10), support::shutdown());

    let err = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::EndpointExhausted);
    assert_eq!(err.attempts, 4);
    assert_eq!(provider.call_count(), 4);
    let calls = provider.calls();
    assert_eq!(calls.iter().filter(|c| c.endpoint == endpoint_url(0)).count(), 2);
    assert_eq!(calls.iter().filter(|c| c.endpoint == endpoint_url(1)).count(), 2);
}

#[tokio::test]
async fn test_total_attempt_ceiling() {
    let provider = Arc::new(ScriptedProvider::new(|_, _| Err(AttemptErrorType::RateLimit)));
    let client = support::client(provider.clone(), 3, fast_policy(3, 4), support::shutdown());

    let err = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::RateLimited);
    assert_eq!(err.attempts, 4);
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn test_repeated_key_hits_provider_once() {
    let provider = Arc::new(ScriptedProvider::constant(2));
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), support::shutdown());

    let first = client.fetch(&culinary_query(-6.20881, 106.84561)).await.unwrap();
    // Same grid cell, different raw coordinates
    let second = client.fetch(&culinary_query(-6.20884, 106.84564)).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.count, 2);
    assert_eq!(second.attempts, 0);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(client.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let provider = Arc::new(
        ScriptedProvider::constant(4).with_script(vec![Err(AttemptErrorType::InvalidQuery)]),
    );
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), support::shutdown());
    let query = culinary_query(-6.2088, 106.8456);

    assert!(client.fetch(&query).await.is_err());
    let found = client.fetch(&query).await.unwrap();

    assert_eq!(found.count, 4);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let provider = Arc::new(ScriptedProvider::constant(1));
    let shutdown = support::shutdown();
    shutdown.request_shutdown("test");
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), shutdown);

    let err = client.fetch(&culinary_query(-6.2088, 106.8456)).await.unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Cancelled);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let provider = Arc::new(ScriptedProvider::new(|_, _| Err(AttemptErrorType::ServerError(502))));
    let shutdown = support::shutdown();
    let mut policy = fast_policy(3, 8);
    policy.base_backoff = Duration::from_secs(30);
    policy.max_backoff = Duration::from_secs(30);
    let client = support::client(provider.clone(), 1, policy, shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown("test");
        }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.fetch(&culinary_query(-6.2088, 106.8456)),
    )
    .await
    .expect("backoff should be interrupted");

    assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);
    assert_eq!(provider.call_count(), 1);
}
