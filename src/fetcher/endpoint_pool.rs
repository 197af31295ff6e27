//! Endpoint pool and per-query cursors
//!
//! The pool is shared and immutable apart from a rotation counter. Failover
//! state lives in the [`EndpointCursor`] owned by a single query, so one
//! query's failures never steer another query away from an endpoint.

use crate::config::AnalyzerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An Overpass-compatible interpreter URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    url: Arc<str>,
}

impl Endpoint {
    /// Wrap a URL
    pub fn new(url: impl AsRef<str>) -> Self {
        Self {
            url: Arc::from(url.as_ref()),
        }
    }

    /// The interpreter URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// How a new cursor picks its first endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Successive cursors start at successive endpoints
    #[default]
    RoundRobin,
    /// Every cursor starts at the first configured endpoint
    Priority,
}

/// Endpoint pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointPoolError {
    /// No endpoints configured
    #[error("endpoint pool requires at least one endpoint")]
    Empty,
}

/// All endpoints were tried by one cursor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all {tried} endpoint(s) tried")]
pub struct ExhaustedError {
    /// Endpoints tried
    pub tried: usize,
}

/// Ordered set of endpoints shared by all queries
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Arc<[Endpoint]>,
    strategy: SelectionStrategy,
    next_start: AtomicUsize,
}

impl EndpointPool {
    /// Create a pool
    pub fn new(
        endpoints: Vec<Endpoint>,
        strategy: SelectionStrategy,
    ) -> Result<Self, EndpointPoolError> {
        if endpoints.is_empty() {
            return Err(EndpointPoolError::Empty);
        }
        Ok(Self {
            endpoints: endpoints.into(),
            strategy,
            next_start: AtomicUsize::new(0),
        })
    }

    /// Create a pool from configured endpoint URLs
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, EndpointPoolError> {
        Self::new(
            config.endpoints.iter().map(Endpoint::new).collect(),
            config.selection,
        )
    }

    /// Endpoints in priority order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; an empty pool cannot be built
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Start a cursor for one query
    pub fn cursor(&self) -> EndpointCursor {
        let start = match self.strategy {
            SelectionStrategy::RoundRobin => {
                self.next_start.fetch_add(1, Ordering::Relaxed) % self.endpoints.len()
            }
            SelectionStrategy::Priority => 0,
        };
        EndpointCursor {
            endpoints: Arc::clone(&self.endpoints),
            start,
            offset: 0,
        }
    }
}

/// Failover position of a single query
///
/// Walks the pool once, wrapping from its start index; no endpoint is
/// returned twice.
#[derive(Debug, Clone)]
pub struct EndpointCursor {
    endpoints: Arc<[Endpoint]>,
    start: usize,
    offset: usize,
}

impl EndpointCursor {
    /// Endpoint to use for the next attempt
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[(self.start + self.offset) % self.endpoints.len()]
    }

    /// Give up on the current endpoint and move to the next untried one
    pub fn next_after_failure(&mut self) -> Result<&Endpoint, ExhaustedError> {
        if self.offset + 1 >= self.endpoints.len() {
            self.offset = self.endpoints.len();
            return Err(ExhaustedError {
                tried: self.endpoints.len(),
            });
        }
        self.offset += 1;
        Ok(self.current())
    }

    /// Endpoints handed out so far, including the current one
    pub fn tried(&self) -> usize {
        (self.offset + 1).min(self.endpoints.len())
    }
}
