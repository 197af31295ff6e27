//! Facility providers and the retrying client
//!
//! [`FacilityProvider`] is the seam to the external geospatial service. The
//! shipped implementation is [`OverpassProvider`]; tests substitute scripted
//! providers. [`RetryingClient`] wraps any provider with caching, endpoint
//! failover, admission control and bounded retries.

use crate::cache::{FacilityItem, FacilityQueryKey};
use crate::config::categories::render_predicate;
use crate::FacilityCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod attempt;
pub mod endpoint_pool;
pub mod overpass;
pub mod retry;

pub use attempt::{AttemptError, AttemptErrorType, RetryContext};
pub use endpoint_pool::{Endpoint, EndpointCursor, EndpointPool, ExhaustedError, SelectionStrategy};
pub use overpass::OverpassProvider;
pub use retry::{FacilityCount, RetryPolicy, RetryingClient};

/// Classification of a failed facility query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Timeouts, connection failures, server errors
    TransientNetwork,
    /// The endpoint asked us to slow down
    RateLimited,
    /// The endpoint rejected the query itself; retrying cannot help
    MalformedQuery,
    /// Every endpoint was tried for this query
    EndpointExhausted,
    /// The run was cancelled while the query was pending
    Cancelled,
}

impl FetchErrorKind {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::TransientNetwork => "transient_network",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::MalformedQuery => "malformed_query",
            FetchErrorKind::EndpointExhausted => "endpoint_exhausted",
            FetchErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A facility query that could not be answered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} after {attempts} attempt(s): {last_cause}")]
pub struct FetchError {
    /// Classification
    pub kind: FetchErrorKind,
    /// Network attempts made
    pub attempts: u32,
    /// Last underlying cause
    pub last_cause: String,
}

impl FetchError {
    /// Build a fetch error
    pub fn new(kind: FetchErrorKind, attempts: u32, last_cause: impl Into<String>) -> Self {
        Self {
            kind,
            attempts,
            last_cause: last_cause.into(),
        }
    }

    /// Cancellation observed before or between attempts
    pub fn cancelled(attempts: u32) -> Self {
        Self::new(FetchErrorKind::Cancelled, attempts, "cancellation requested")
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetchError>;

/// One facility query: a category predicate rendered for a grid cell and radius
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityQuery {
    key: FacilityQueryKey,
    overpass_ql: String,
}

impl FacilityQuery {
    /// Build a query
    ///
    /// Coordinates are snapped to the cache grid before rendering, so the
    /// query text is a pure function of its cache key.
    pub fn new(
        category: FacilityCategory,
        latitude: f64,
        longitude: f64,
        radius_m: u32,
        predicate_template: &str,
        predicate_version: impl Into<String>,
    ) -> Self {
        let key = FacilityQueryKey::new(latitude, longitude, radius_m, category, predicate_version);
        let overpass_ql =
            render_predicate(predicate_template, key.latitude(), key.longitude(), radius_m);
        Self { key, overpass_ql }
    }

    /// Cache key
    pub fn key(&self) -> &FacilityQueryKey {
        &self.key
    }

    /// Category queried
    pub fn category(&self) -> FacilityCategory {
        self.key.category
    }

    /// Search radius in meters
    pub fn radius_m(&self) -> u32 {
        self.key.radius_m
    }

    /// Rendered Overpass QL
    pub fn overpass_ql(&self) -> &str {
        &self.overpass_ql
    }
}

/// Facilities returned by a provider for one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilityPayload {
    /// Returned elements
    pub items: Vec<FacilityItem>,
}

impl FacilityPayload {
    /// Number of facilities
    pub fn count(&self) -> u32 {
        u32::try_from(self.items.len()).unwrap_or(u32::MAX)
    }
}

/// External geospatial query service
///
/// Implementations perform exactly one network attempt per call; retries,
/// failover and caching belong to [`RetryingClient`].
#[async_trait]
pub trait FacilityProvider: Send + Sync {
    /// Run `query` against `endpoint`
    async fn query(
        &self,
        endpoint: &Endpoint,
        query: &FacilityQuery,
    ) -> Result<FacilityPayload, AttemptError>;
}
