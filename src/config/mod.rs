//! Analyzer configuration
//!
//! Configuration is loaded from TOML and validated once at load time; a
//! config that fails validation never reaches the engine. Every section has
//! defaults, so an empty file (or no file) yields a working setup against the
//! public Overpass endpoints.

pub mod categories;

use crate::analysis::rating::RatingTable;
use crate::fetcher::endpoint_pool::SelectionStrategy;
use crate::fetcher::retry::RetryPolicy;
use crate::FacilityCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use categories::{CategorySettings, CategoryTable, ResolvedCategory};

/// Default Overpass interpreter endpoints, in priority order
pub const DEFAULT_ENDPOINTS: [&str; 3] = [
    "http://31.97.187.239:12345/api/interpreter",
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
];

/// Default cache file name
pub const DEFAULT_CACHE_FILE: &str = "facility_cache.jsonl";

/// Default progress file name
pub const DEFAULT_PROGRESS_FILE: &str = "outlet_analysis_progress.json";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {message}")]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A field failed validation
    #[error("invalid config field '{field}': {reason}")]
    Invalid {
        /// Dotted field path
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// When a zero count triggers a second query at the escalated radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Re-query a category once when its base-radius count is zero
    #[default]
    EmptyCategory,
    /// Re-query every category once when the whole outlet counted zero
    EmptyOutlet,
    /// Never escalate
    Never,
}

impl EscalationTrigger {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTrigger::EmptyCategory => "empty_category",
            EscalationTrigger::EmptyOutlet => "empty_outlet",
            EscalationTrigger::Never => "never",
        }
    }
}

/// Retry and timeout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Attempts on one endpoint before failing over
    pub attempts_per_endpoint: u32,
    /// Hard ceiling on network attempts per query
    pub max_total_attempts: u32,
    /// First backoff delay
    pub base_backoff_ms: u64,
    /// Backoff cap
    pub max_backoff_ms: u64,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter_ms: u64,
    /// Delay multiplier applied after a rate-limit response
    pub rate_limit_multiplier: u32,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Connection timeout
    pub connect_timeout_secs: u64,
    /// User-Agent header sent to endpoints
    pub user_agent: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts_per_endpoint: 3,
            max_total_attempts: 8,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            jitter_ms: 250,
            rate_limit_multiplier: 4,
            request_timeout_secs: 25,
            connect_timeout_secs: 10,
            user_agent: format!("outlet-facility-analyzer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RetrySettings {
    /// Runtime retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts_per_endpoint: self.attempts_per_endpoint,
            max_total_attempts: self.max_total_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            rate_limit_multiplier: self.rate_limit_multiplier,
        }
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Worker pool and admission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencySettings {
    /// Concurrent outlets; derived from the dataset size when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Concurrent requests allowed per endpoint
    pub per_endpoint_cap: usize,
    /// How long an endpoint slot stays taken after a request finishes
    pub cooldown_ms: u64,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            workers: None,
            per_endpoint_cap: 4,
            cooldown_ms: 0,
        }
    }
}

/// Query cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Whether results are persisted across runs
    pub enabled: bool,
    /// Cache file (JSON lines)
    pub path: PathBuf,
    /// Keep the returned facility items alongside counts
    pub store_raw_items: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_CACHE_FILE),
            store_raw_items: false,
        }
    }
}

/// Competitor proximity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompetitorSettings {
    /// Competitor store list (JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Search radius in kilometers
    pub radius_km: f64,
}

impl Default for CompetitorSettings {
    fn default() -> Self {
        Self {
            path: None,
            radius_km: 0.5,
        }
    }
}

/// Top-level analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Overpass endpoints in priority order
    pub endpoints: Vec<String>,
    /// How successive queries pick their first endpoint
    pub selection: SelectionStrategy,
    /// Progress file path
    pub progress_path: PathBuf,
    /// Radius escalation policy
    pub escalation: EscalationTrigger,
    /// Retry settings
    pub retry: RetrySettings,
    /// Concurrency settings
    pub concurrency: ConcurrencySettings,
    /// Cache settings
    pub cache: CacheSettings,
    /// Competitor settings
    pub competitors: CompetitorSettings,
    /// Star rating thresholds
    pub rating: RatingTable,
    /// Per-category predicates and radii
    pub categories: BTreeMap<FacilityCategory, CategorySettings>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories::fill_defaults(&mut categories);
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            selection: SelectionStrategy::default(),
            progress_path: PathBuf::from(DEFAULT_PROGRESS_FILE),
            escalation: EscalationTrigger::default(),
            retry: RetrySettings::default(),
            concurrency: ConcurrencySettings::default(),
            cache: CacheSettings::default(),
            competitors: CompetitorSettings::default(),
            rating: RatingTable::default(),
            categories,
        }
    }
}

impl AnalyzerConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading analyzer config");
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            escalation = config.escalation.as_str(),
            "Analyzer config loaded"
        );
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: AnalyzerConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        categories::fill_defaults(&mut config.categories);
        config.validate()?;
        Ok(config)
    }

    /// Check every field; called by [`AnalyzerConfig::load`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::invalid("endpoints", "at least one endpoint is required"));
        }
        for endpoint in &self.endpoints {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "endpoints",
                    format!("'{endpoint}' is not an http(s) URL"),
                ));
            }
        }

        let retry = &self.retry;
        if retry.attempts_per_endpoint == 0 {
            return Err(ConfigError::invalid("retry.attempts_per_endpoint", "must be at least 1"));
        }
        if retry.max_total_attempts < retry.attempts_per_endpoint {
            return Err(ConfigError::invalid(
                "retry.max_total_attempts",
                format!(
                    "{} is below attempts_per_endpoint ({})",
                    retry.max_total_attempts, retry.attempts_per_endpoint
                ),
            ));
        }
        let reachable = self.reachable_attempts();
        if retry.max_total_attempts > reachable {
            warn!(
                max_total_attempts = retry.max_total_attempts,
                reachable,
                "retry.max_total_attempts exceeds attempts_per_endpoint x endpoints; clamping"
            );
        }
        if retry.base_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.base_backoff_ms",
                "must not exceed max_backoff_ms",
            ));
        }
        if retry.rate_limit_multiplier == 0 {
            return Err(ConfigError::invalid("retry.rate_limit_multiplier", "must be at least 1"));
        }
        if retry.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("retry.request_timeout_secs", "must be at least 1"));
        }

        if self.concurrency.per_endpoint_cap == 0 {
            return Err(ConfigError::invalid("concurrency.per_endpoint_cap", "must be at least 1"));
        }
        if self.concurrency.workers == Some(0) {
            return Err(ConfigError::invalid("concurrency.workers", "must be at least 1"));
        }

        if !(self.competitors.radius_km.is_finite() && self.competitors.radius_km > 0.0) {
            return Err(ConfigError::invalid("competitors.radius_km", "must be a positive number"));
        }

        self.rating
            .validate()
            .map_err(|e| ConfigError::invalid("rating.tiers", e.to_string()))?;
        categories::validate_specs(&self.categories)?;
        Ok(())
    }

    /// Retry policy with the total ceiling clamped to what the endpoints allow
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = self.retry.policy();
        policy.max_total_attempts = policy.max_total_attempts.min(self.reachable_attempts());
        policy
    }

    fn reachable_attempts(&self) -> u32 {
        let endpoints = u32::try_from(self.endpoints.len()).unwrap_or(u32::MAX);
        self.retry.attempts_per_endpoint.saturating_mul(endpoints)
    }

    /// Resolved category table
    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        CategoryTable::from_specs(&self.categories)
    }

    /// Settings that change what a result means; part of the run fingerprint
    pub fn fingerprint_material(&self) -> Result<String, ConfigError> {
        let table = self.category_table()?;
        let mut material = format!("escalation={};", self.escalation.as_str());
        for entry in table.iter() {
            material.push_str(&format!(
                "{}:{}:{}:{};",
                entry.category(),
                entry.radius_m(),
                entry.escalated_radius_m(),
                entry.predicate_version()
            ));
        }
        for tier in self.rating.tiers() {
            material.push_str(&format!("tier:{}:{};", tier.min_present, tier.stars));
        }
        Ok(material)
    }
}
