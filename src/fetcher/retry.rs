//! Retrying facility client
//!
//! Answers a [`FacilityQuery`] from the cache when possible; otherwise runs
//! it against the endpoint pool with bounded retries:
//!
//! - up to `attempts_per_endpoint` attempts on one endpoint, with exponential
//!   backoff and jitter between them (longer after a rate-limit response)
//! - then fail over to the next untried endpoint of this query's cursor
//! - never more than `max_total_attempts` network attempts in total
//! - non-retryable errors (rejected query) return immediately
//!
//! Backoff sleeps and permit waits race the shutdown signal.

use crate::analysis::rate_limit::RateLimiter;
use crate::cache::{CacheEntry, QueryCache};
use crate::fetcher::attempt::{AttemptError, AttemptErrorType, RetryContext};
use crate::fetcher::{
    Endpoint, EndpointPool, FacilityPayload, FacilityProvider, FacilityQuery, FetchError,
    FetchErrorKind, FetcherResult,
};
use crate::metrics::{record_retry_backoff, QueryMetrics};
use crate::shutdown::{self, SharedShutdown};
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts on one endpoint before failing over
    pub attempts_per_endpoint: u32,
    /// Hard ceiling on network attempts per query
    pub max_total_attempts: u32,
    /// First backoff delay
    pub base_backoff: Duration,
    /// Backoff cap before the rate-limit multiplier
    pub max_backoff: Duration,
    /// Upper bound of uniform jitter
    pub jitter: Duration,
    /// Multiplier applied after a rate-limit response
    pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::config::RetrySettings::default().policy()
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based) on the same endpoint, without jitter
    pub fn calculate_backoff(&self, retry: u32, error_type: AttemptErrorType) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff);
        if error_type == AttemptErrorType::RateLimit {
            delay.saturating_mul(self.rate_limit_multiplier.max(1))
        } else {
            delay
        }
    }
}

/// Answer to a facility query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilityCount {
    /// Facilities found
    pub count: u32,
    /// Whether the cache answered
    pub from_cache: bool,
    /// Network attempts made
    pub attempts: u32,
}

/// Cache-first client with failover and bounded retries
pub struct RetryingClient {
    provider: Arc<dyn FacilityProvider>,
    pool: Arc<EndpointPool>,
    limiter: Arc<RateLimiter>,
    cache: Arc<QueryCache>,
    policy: RetryPolicy,
    store_raw_items: bool,
    shutdown: Option<SharedShutdown>,
    rng: Mutex<StdRng>,
}

impl RetryingClient {
    /// Create a client
    pub fn new(
        provider: Arc<dyn FacilityProvider>,
        pool: Arc<EndpointPool>,
        limiter: Arc<RateLimiter>,
        cache: Arc<QueryCache>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            pool,
            limiter,
            cache,
            policy,
            store_raw_items: false,
            shutdown: shutdown::get_global_shutdown(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Keep returned items in cache entries
    pub fn with_raw_items(mut self, store_raw_items: bool) -> Self {
        self.store_raw_items = store_raw_items;
        self
    }

    /// Attach a shared shutdown handle for cooperative cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Seed the jitter source (deterministic tests)
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Shared cache
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Resolve one query
    pub async fn fetch(&self, query: &FacilityQuery) -> FetcherResult<FacilityCount> {
        if let Some(entry) = self.cache.get(query.key()) {
            debug!(key = %query.key(), count = entry.facility_count, "Cache hit");
            return Ok(FacilityCount {
                count: entry.facility_count,
                from_cache: true,
                attempts: 0,
            });
        }

        let mut cursor = self.pool.cursor();
        let mut attempts = 0u32;
        let mut local_attempts = 0u32;
        let mut last_error: Option<AttemptError> = None;

        loop {
            if self.shutdown_requested() {
                return Err(FetchError::cancelled(attempts));
            }

            let endpoint = cursor.current().clone();
            attempts += 1;
            local_attempts += 1;

            let Some(outcome) = self.attempt(&endpoint, query, attempts).await else {
                return Err(FetchError::cancelled(attempts));
            };

            let failure = match outcome {
                Ok(payload) => {
                    if let Some(previous) = &last_error {
                        info!(
                            "{}",
                            self.context(query, &endpoint, attempts, previous, Duration::ZERO)
                                .format_success()
                        );
                    }
                    return Ok(self.store(query, payload, attempts));
                }
                Err(failure) => failure,
            };

            if !failure.error_type.is_retryable() {
                error!(
                    "{}",
                    self.context(query, &endpoint, attempts, &failure, Duration::ZERO)
                        .format_failure()
                );
                return Err(FetchError::new(
                    FetchErrorKind::MalformedQuery,
                    attempts,
                    failure.to_string(),
                ));
            }

            if attempts >= self.policy.max_total_attempts {
                error!(
                    "{}",
                    self.context(query, &endpoint, attempts, &failure, Duration::ZERO)
                        .format_failure()
                );
                return Err(FetchError::new(
                    failure.error_type.fetch_kind(),
                    attempts,
                    failure.to_string(),
                ));
            }

            if local_attempts >= self.policy.attempts_per_endpoint {
                match cursor.next_after_failure() {
                    Ok(next) => {
                        warn!(
                            from = %endpoint,
                            to = %next,
                            key = %query.key(),
                            "Endpoint failed repeatedly, failing over"
                        );
                        local_attempts = 0;
                        last_error = Some(failure);
                        continue;
                    }
                    Err(exhausted) => {
                        error!(
                            "{}",
                            self.context(query, &endpoint, attempts, &failure, Duration::ZERO)
                                .format_failure()
                        );
                        return Err(FetchError::new(
                            FetchErrorKind::EndpointExhausted,
                            attempts,
                            format!("{exhausted}; last error: {failure}"),
                        ));
                    }
                }
            }

            let backoff = self.backoff_with_jitter(local_attempts, failure.error_type);
            warn!(
                "{}",
                self.context(query, &endpoint, attempts + 1, &failure, backoff)
                    .format_retry()
            );
            record_retry_backoff(backoff, attempts);
            last_error = Some(failure);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {},
                _ = self.cancelled() => return Err(FetchError::cancelled(attempts)),
            }
        }
    }

    /// One admission-controlled network attempt; `None` when cancelled while queued
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        query: &FacilityQuery,
        attempt: u32,
    ) -> Option<Result<FacilityPayload, AttemptError>> {
        let permit = tokio::select! {
            permit = self.limiter.acquire(endpoint) => permit,
            _ = self.cancelled() => return None,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                return Some(Err(AttemptError::new(
                    AttemptErrorType::NetworkGeneric,
                    e.to_string(),
                )))
            }
        };

        let metrics = QueryMetrics::start(endpoint.url(), attempt);
        let outcome = self.provider.query(endpoint, query).await;
        match &outcome {
            Ok(payload) => metrics.record_success(payload.count()),
            Err(e) => metrics.record_failure(e.error_type.label()),
        }
        Some(outcome)
    }

    fn store(&self, query: &FacilityQuery, payload: FacilityPayload, attempts: u32) -> FacilityCount {
        let count = payload.count();
        self.cache.put(CacheEntry {
            key: query.key().clone(),
            facility_count: count,
            raw_items: self.store_raw_items.then_some(payload.items),
            fetched_at: Utc::now(),
        });
        FacilityCount {
            count,
            from_cache: false,
            attempts,
        }
    }

    fn backoff_with_jitter(&self, retry: u32, error_type: AttemptErrorType) -> Duration {
        let delay = self.policy.calculate_backoff(retry, error_type);
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let jitter = self.rng.lock().gen_range(0..jitter_ms);
        delay + Duration::from_millis(jitter)
    }

    fn context(
        &self,
        query: &FacilityQuery,
        endpoint: &Endpoint,
        attempt: u32,
        failure: &AttemptError,
        backoff: Duration,
    ) -> RetryContext {
        RetryContext {
            attempt,
            max_attempts: self.policy.max_total_attempts,
            error_type: failure.error_type,
            backoff_duration: backoff,
            category: query.category(),
            query: query.key().to_string(),
            error_message: failure.message.clone(),
            endpoint: endpoint.to_string(),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    async fn cancelled(&self) {
        match &self.shutdown {
            Some(shutdown) => shutdown.wait_for_shutdown().await,
            None => std::future::pending::<()>().await,
        }
    }
}
