//! Per-endpoint admission control
//!
//! Every endpoint gets its own semaphore with `per_endpoint_cap` permits.
//! Callers queue for a permit rather than being rejected, and hold it for a
//! single network attempt only, never across a backoff sleep, so workers
//! waiting on each other's permits cannot deadlock.

use crate::config::ConcurrencySettings;
use crate::fetcher::Endpoint;
use crate::metrics::RateLimiterMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire a permit
    #[error("failed to acquire rate limit permit: {0}")]
    AcquireError(String),
}

/// Admission slot for one attempt against one endpoint
///
/// Dropping the permit frees the slot, after the configured cooldown if any.
#[derive(Debug)]
pub struct EndpointPermit {
    permit: Option<OwnedSemaphorePermit>,
    cooldown: Duration,
}

impl Drop for EndpointPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if self.cooldown.is_zero() {
            return;
        }
        // Keep the slot taken for the cooldown, then release it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cooldown = self.cooldown;
            handle.spawn(async move {
                tokio::time::sleep(cooldown).await;
                drop(permit);
            });
        }
    }
}

/// Per-endpoint concurrency limiter shared by all workers
#[derive(Debug)]
pub struct RateLimiter {
    per_endpoint_cap: usize,
    cooldown: Duration,
    semaphores: Mutex<HashMap<Endpoint, Arc<Semaphore>>>,
}

impl RateLimiter {
    /// Create a limiter
    ///
    /// # Arguments
    /// * `per_endpoint_cap` - Concurrent attempts allowed per endpoint (min 1)
    /// * `cooldown` - Extra time a slot stays taken after its attempt ends
    pub fn new(per_endpoint_cap: usize, cooldown: Duration) -> Self {
        Self {
            per_endpoint_cap: per_endpoint_cap.max(1),
            cooldown,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter from configuration
    pub fn from_config(settings: &ConcurrencySettings) -> Self {
        Self::new(
            settings.per_endpoint_cap,
            Duration::from_millis(settings.cooldown_ms),
        )
    }

    /// Permits per endpoint
    pub fn per_endpoint_cap(&self) -> usize {
        self.per_endpoint_cap
    }

    /// Wait for a slot on `endpoint`
    pub async fn acquire(&self, endpoint: &Endpoint) -> Result<EndpointPermit, RateLimitError> {
        let semaphore = self.semaphore_for(endpoint);
        let metrics = RateLimiterMetrics::start_acquire();
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;
        metrics.record_acquired(endpoint.url());

        Ok(EndpointPermit {
            permit: Some(permit),
            cooldown: self.cooldown,
        })
    }

    /// Free slots on `endpoint`
    pub fn available(&self, endpoint: &Endpoint) -> usize {
        self.semaphore_for(endpoint).available_permits()
    }

    fn semaphore_for(&self, endpoint: &Endpoint) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock();
        Arc::clone(
            semaphores
                .entry(endpoint.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_endpoint_cap))),
        )
    }
}
