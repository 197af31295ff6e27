//! Scripted in-process providers and builders shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use outlet_facility_analyzer::analysis::{FacilityAggregator, RateLimiter, RatingTable};
use outlet_facility_analyzer::cache::{FacilityItem, FacilityQueryKey, QueryCache};
use outlet_facility_analyzer::config::{CategoryTable, EscalationTrigger};
use outlet_facility_analyzer::fetcher::{
    AttemptError, AttemptErrorType, Endpoint, EndpointPool, FacilityPayload, FacilityProvider,
    FacilityQuery, RetryPolicy, RetryingClient, SelectionStrategy,
};
use outlet_facility_analyzer::shutdown::{ShutdownCoordinator, SharedShutdown};
use outlet_facility_analyzer::Outlet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Decides the answer to a query that has no scripted response left
pub type Responder =
    dyn Fn(&Endpoint, &FacilityQuery) -> Result<u32, AttemptErrorType> + Send + Sync;

/// One provider call as seen by the fake
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub key: FacilityQueryKey,
}

/// Provider that answers from a queue of scripted responses, then a closure
pub struct ScriptedProvider {
    responder: Box<Responder>,
    queued: Mutex<VecDeque<Result<u32, AttemptErrorType>>>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Endpoint, &FacilityQuery) -> Result<u32, AttemptErrorType> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            queued: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every query finds `count` facilities
    pub fn constant(count: u32) -> Self {
        Self::new(move |_, _| Ok(count))
    }

    /// Answer the first calls from `script`, in order
    pub fn with_script(self, script: Vec<Result<u32, AttemptErrorType>>) -> Self {
        *self.queued.lock() = script.into();
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl FacilityProvider for ScriptedProvider {
    async fn query(
        &self,
        endpoint: &Endpoint,
        query: &FacilityQuery,
    ) -> Result<FacilityPayload, AttemptError> {
        self.calls.lock().push(Call {
            endpoint: endpoint.url().to_string(),
            key: query.key().clone(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.queued.lock().pop_front();
        let answer = match scripted {
            Some(answer) => answer,
            None => (self.responder)(endpoint, query),
        };
        match answer {
            Ok(count) => Ok(payload(count)),
            Err(error_type) => Err(AttemptError::new(error_type, "scripted failure")),
        }
    }
}

pub fn payload(count: u32) -> FacilityPayload {
    FacilityPayload {
        items: (0..count)
            .map(|i| FacilityItem {
                id: i64::from(i),
                element_type: "node".to_string(),
                name: None,
                lat: None,
                lon: None,
            })
            .collect(),
    }
}

/// Retry policy with millisecond backoffs and no jitter
pub fn fast_policy(attempts_per_endpoint: u32, max_total_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts_per_endpoint,
        max_total_attempts,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        jitter: Duration::ZERO,
        rate_limit_multiplier: 2,
    }
}

pub fn endpoint_url(index: usize) -> String {
    format!("http://endpoint-{index}.test/api/interpreter")
}

pub fn pool(endpoints: usize) -> Arc<EndpointPool> {
    let endpoints = (0..endpoints).map(|i| Endpoint::new(endpoint_url(i))).collect();
    Arc::new(EndpointPool::new(endpoints, SelectionStrategy::Priority).unwrap())
}

pub fn shutdown() -> SharedShutdown {
    ShutdownCoordinator::shared()
}

pub fn client(
    provider: Arc<ScriptedProvider>,
    endpoints: usize,
    policy: RetryPolicy,
    shutdown: SharedShutdown,
) -> RetryingClient {
    RetryingClient::new(
        provider,
        pool(endpoints),
        Arc::new(RateLimiter::new(4, Duration::ZERO)),
        Arc::new(QueryCache::in_memory()),
        policy,
    )
    .with_shutdown(shutdown)
    .with_seed(7)
}

pub fn aggregator(client: RetryingClient, escalation: EscalationTrigger) -> FacilityAggregator {
    FacilityAggregator::new(
        Arc::new(client),
        CategoryTable::defaults(),
        RatingTable::default(),
        escalation,
    )
}

/// Outlets spaced ~1 km apart so no two share a cache key
pub fn outlet(index: usize) -> Outlet {
    Outlet::new(
        format!("OUT-{index:03}"),
        format!("Outlet {index}"),
        -6.1 - index as f64 * 0.01,
        106.8,
    )
    .unwrap()
}

pub fn outlets(count: usize) -> Vec<Outlet> {
    (0..count).map(outlet).collect()
}

/// Whether a query targets `outlet`'s grid cell
pub fn targets(query: &FacilityQuery, outlet: &Outlet) -> bool {
    (query.key().latitude() - outlet.latitude).abs() < 1e-6
        && (query.key().longitude() - outlet.longitude).abs() < 1e-6
}
