//! Cache key construction
//!
//! Coordinates are snapped to a 1e-4 degree grid (about 11 m at the equator)
//! and stored as integers, so keys compare exactly and stay stable across
//! restarts and platforms.

use crate::FacilityCategory;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Grid cells per degree
pub const COORDINATE_SCALE: f64 = 10_000.0;

/// Number of hex characters kept from a template digest
const FINGERPRINT_LEN: usize = 12;

/// Snap a coordinate to the cache grid
pub fn round_coordinate(value: f64) -> i32 {
    (value * COORDINATE_SCALE).round() as i32
}

/// Short SHA-256 digest of a predicate template
///
/// Editing a template changes its fingerprint, which retires every cache
/// entry produced by the old template.
pub fn predicate_fingerprint(template: &str) -> String {
    let digest = Sha256::digest(template.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}

/// Identity of one facility query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FacilityQueryKey {
    /// Latitude in grid cells
    pub lat_e4: i32,
    /// Longitude in grid cells
    pub lon_e4: i32,
    /// Search radius in meters
    pub radius_m: u32,
    /// Facility category
    pub category: FacilityCategory,
    /// Version of the predicate that produced the count
    pub predicate_version: String,
}

impl FacilityQueryKey {
    /// Build a key, snapping coordinates to the grid
    pub fn new(
        latitude: f64,
        longitude: f64,
        radius_m: u32,
        category: FacilityCategory,
        predicate_version: impl Into<String>,
    ) -> Self {
        Self {
            lat_e4: round_coordinate(latitude),
            lon_e4: round_coordinate(longitude),
            radius_m,
            category,
            predicate_version: predicate_version.into(),
        }
    }

    /// Latitude of the grid cell center
    pub fn latitude(&self) -> f64 {
        self.lat_e4 as f64 / COORDINATE_SCALE
    }

    /// Longitude of the grid cell center
    pub fn longitude(&self) -> f64 {
        self.lon_e4 as f64 / COORDINATE_SCALE
    }
}

impl fmt::Display for FacilityQueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4},{:.4},{}m,{},{}",
            self.latitude(),
            self.longitude(),
            self.radius_m,
            self.category,
            self.predicate_version
        )
    }
}
