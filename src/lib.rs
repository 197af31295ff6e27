//! # Outlet Facility Analyzer Library
//!
//! Rates retail outlet locations by the facilities around them. For every
//! outlet the engine counts nearby facilities in nine categories through an
//! Overpass-compatible geospatial service, derives a 1–5 star rating from the
//! number of categories present, and persists progress after each outlet so an
//! interrupted batch picks up where it stopped.
//!
//! ## Features
//!
//! - **Endpoint failover**: per-query rotation across redundant Overpass endpoints
//! - **Retry with backoff**: bounded per-endpoint and global attempt budgets with jitter
//! - **Admission control**: per-endpoint concurrency caps shared by all workers
//! - **Query cache**: persistent, keyed by rounded coordinates, radius, category and predicate version
//! - **Resumable batches**: atomic checkpoint after every completed outlet
//! - **Cooperative cancellation**: Ctrl+C stops dispatch without corrupting state
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use outlet_facility_analyzer::analysis::{BatchScheduler, FacilityAggregator, RateLimiter};
//! use outlet_facility_analyzer::cache::QueryCache;
//! use outlet_facility_analyzer::config::AnalyzerConfig;
//! use outlet_facility_analyzer::fetcher::{EndpointPool, OverpassProvider, RetryingClient};
//! use outlet_facility_analyzer::resume::ProgressState;
//! use outlet_facility_analyzer::Outlet;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnalyzerConfig::default();
//! let provider = Arc::new(OverpassProvider::new(&config.retry)?);
//! let pool = Arc::new(EndpointPool::from_config(&config)?);
//! let limiter = Arc::new(RateLimiter::from_config(&config.concurrency));
//! let cache = Arc::new(QueryCache::in_memory());
//! let client = RetryingClient::new(provider, pool, limiter, cache, config.retry_policy());
//! let aggregator = FacilityAggregator::from_config(Arc::new(client), &config)?;
//!
//! let outlets = vec![Outlet::new("OUT-001", "Toko Sumber Rejeki", -6.2088, 106.8456)?];
//! let scheduler = BatchScheduler::new(Arc::new(aggregator));
//! let outcome = scheduler.run(&outlets, ProgressState::new("example")).await?;
//! println!("{} outlets analyzed", outcome.state.completed_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - TOML configuration, category predicates and validation
//! - [`cache`] - Persistent facility query cache
//! - [`fetcher`] - Provider seam, Overpass client, endpoint pool and retrying client
//! - [`analysis`] - Rate limiter, per-outlet aggregation, rating and the batch scheduler
//! - [`resume`] - Progress persistence with atomic writes and run locking
//! - [`competitor`] - Competitor store proximity lookups
//! - [`report`] - Run summary and JSON export

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Per-outlet aggregation, rating, rate limiting and batch scheduling
pub mod analysis;

/// Facility query cache
pub mod cache;

/// CLI command implementations
pub mod cli;

/// Competitor store proximity
pub mod competitor;

/// Configuration loading and validation
pub mod config;

/// Facility providers and the retrying client
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Run summary and export
pub mod report;

/// Resumable progress state
pub mod resume;

/// Cooperative cancellation
pub mod shutdown;

use crate::fetcher::FetchErrorKind;

/// Errors raised while building or parsing core model values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Outlet id was empty
    #[error("outlet id must not be empty")]
    EmptyOutletId,

    /// Latitude outside [-90, 90] or not finite
    #[error("invalid latitude {0}: must be within [-90, 90]")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180] or not finite
    #[error("invalid longitude {0}: must be within [-180, 180]")]
    InvalidLongitude(f64),

    /// Coordinate string could not be parsed
    #[error("invalid coordinates '{0}': expected \"lat, lon\"")]
    InvalidCoordinates(String),

    /// Unknown facility category tag
    #[error("unknown facility category: {0}")]
    UnknownCategory(String),
}

/// Facility categories counted around each outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityCategory {
    /// Housing estates, apartments, dormitories
    Residential,
    /// Schools, universities, courses
    Education,
    /// Parks, places of worship, stations, public buildings
    PublicArea,
    /// Restaurants, cafes, food stalls
    Culinary,
    /// Shops, offices, malls, markets
    BusinessCenter,
    /// Supermarkets, greengrocers, traditional markets
    Groceries,
    /// Minimarket chains and convenience shops
    #[serde(alias = "convenient_stores")]
    ConvenienceStore,
    /// Factories, warehouses, industrial estates
    Industrial,
    /// Hospitals, clinics, pharmacies
    HospitalClinic,
}

impl FacilityCategory {
    /// All categories in their fixed reporting order
    pub const ALL: [FacilityCategory; 9] = [
        FacilityCategory::Residential,
        FacilityCategory::Education,
        FacilityCategory::PublicArea,
        FacilityCategory::Culinary,
        FacilityCategory::BusinessCenter,
        FacilityCategory::Groceries,
        FacilityCategory::ConvenienceStore,
        FacilityCategory::Industrial,
        FacilityCategory::HospitalClinic,
    ];

    /// Snake-case tag used in configuration, cache keys and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityCategory::Residential => "residential",
            FacilityCategory::Education => "education",
            FacilityCategory::PublicArea => "public_area",
            FacilityCategory::Culinary => "culinary",
            FacilityCategory::BusinessCenter => "business_center",
            FacilityCategory::Groceries => "groceries",
            FacilityCategory::ConvenienceStore => "convenience_store",
            FacilityCategory::Industrial => "industrial",
            FacilityCategory::HospitalClinic => "hospital_clinic",
        }
    }

    /// Human-readable label for terminal output
    pub fn display_name(&self) -> &'static str {
        match self {
            FacilityCategory::Residential => "Residential",
            FacilityCategory::Education => "Education",
            FacilityCategory::PublicArea => "Public Area",
            FacilityCategory::Culinary => "Culinary",
            FacilityCategory::BusinessCenter => "Business Center",
            FacilityCategory::Groceries => "Groceries",
            FacilityCategory::ConvenienceStore => "Convenience Store",
            FacilityCategory::Industrial => "Industrial",
            FacilityCategory::HospitalClinic => "Hospital/Clinic",
        }
    }
}

impl fmt::Display for FacilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacilityCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' ', '/'], "_");
        match normalized.as_str() {
            "residential" => Ok(FacilityCategory::Residential),
            "education" => Ok(FacilityCategory::Education),
            "public_area" => Ok(FacilityCategory::PublicArea),
            "culinary" => Ok(FacilityCategory::Culinary),
            "business_center" => Ok(FacilityCategory::BusinessCenter),
            "groceries" => Ok(FacilityCategory::Groceries),
            "convenience_store" | "convenient_stores" => Ok(FacilityCategory::ConvenienceStore),
            "industrial" => Ok(FacilityCategory::Industrial),
            "hospital_clinic" => Ok(FacilityCategory::HospitalClinic),
            _ => Err(ModelError::UnknownCategory(s.to_string())),
        }
    }
}

/// A retail outlet location
///
/// Outlets are read-only inputs to a run. Use [`Outlet::new`] or
/// [`Outlet::validate`] so coordinates are checked before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlet {
    /// Stable outlet identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// District the outlet belongs to, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kecamatan: Option<String>,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

impl Outlet {
    /// Create a validated outlet
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, ModelError> {
        let outlet = Self {
            id: id.into(),
            name: name.into(),
            kecamatan: None,
            latitude,
            longitude,
        };
        outlet.validate()?;
        Ok(outlet)
    }

    /// Attach a district name
    pub fn with_kecamatan(mut self, kecamatan: impl Into<String>) -> Self {
        self.kecamatan = Some(kecamatan.into());
        self
    }

    /// Check id and coordinate ranges
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::EmptyOutletId);
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ModelError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ModelError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }
}

/// Parse a `"lat, lon"` or `"lat lon"` coordinate pair.
///
/// Spreadsheet exports carry coordinates as a single text cell; both comma
/// and whitespace separators are accepted.
pub fn parse_coordinates(input: &str) -> Result<(f64, f64), ModelError> {
    let invalid = || ModelError::InvalidCoordinates(input.to_string());

    let parts: Vec<&str> = if input.contains(',') {
        input.split(',').map(str::trim).collect()
    } else {
        input.split_whitespace().collect()
    };
    if parts.len() != 2 {
        return Err(invalid());
    }

    let lat: f64 = parts[0].parse().map_err(|_| invalid())?;
    let lon: f64 = parts[1].parse().map_err(|_| invalid())?;
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ModelError::InvalidLatitude(lat));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(ModelError::InvalidLongitude(lon));
    }
    Ok((lat, lon))
}

/// Terminal status of an analyzed outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutletStatus {
    /// Every category was counted
    Complete,
    /// Some categories were counted, some failed
    Partial,
    /// No category could be counted
    Failed,
}

impl OutletStatus {
    /// Derive the status from the number of counted and failed categories
    pub fn from_counts(counted: usize, failed: usize) -> Self {
        match (counted, failed) {
            (_, 0) => OutletStatus::Complete,
            (0, _) => OutletStatus::Failed,
            _ => OutletStatus::Partial,
        }
    }

    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            OutletStatus::Complete => "complete",
            OutletStatus::Partial => "partial",
            OutletStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a category could not be counted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFailure {
    /// Error classification
    pub kind: FetchErrorKind,
    /// Last underlying cause
    pub cause: String,
}

/// Outcome of facility analysis for one outlet
///
/// Created once when the outlet finishes and never mutated afterwards.
/// Categories appear in exactly one of `per_category_count` or
/// `failed_categories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutletFacilityResult {
    /// Outlet this result belongs to
    pub outlet_id: String,
    /// Facility count per successfully counted category
    pub per_category_count: BTreeMap<FacilityCategory, u32>,
    /// Categories whose count could not be obtained
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_categories: BTreeMap<FacilityCategory, CategoryFailure>,
    /// Search radius (meters) that produced each count
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub radius_used_m: BTreeMap<FacilityCategory, u32>,
    /// Number of counted categories with at least one facility
    pub categories_present: u8,
    /// Star rating (1–5)
    pub star_rating: u8,
    /// Terminal status
    pub status: OutletStatus,
    /// Completion timestamp
    pub analyzed_at: DateTime<Utc>,
}

impl OutletFacilityResult {
    /// Whether the category was counted with at least one facility
    pub fn is_present(&self, category: FacilityCategory) -> bool {
        self.per_category_count
            .get(&category)
            .map(|count| *count > 0)
            .unwrap_or(false)
    }

    /// Categories counted with at least one facility, in reporting order
    pub fn present_categories(&self) -> Vec<FacilityCategory> {
        FacilityCategory::ALL
            .into_iter()
            .filter(|category| self.is_present(*category))
            .collect()
    }
}
