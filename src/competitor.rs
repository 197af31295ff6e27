//! Competitor store proximity
//!
//! Loads a JSON list of competitor stores and finds the ones within a
//! radius of an outlet by great-circle distance. Competitor presence is
//! reported next to the facility rating, never folded into it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Default proximity radius in kilometers
pub const DEFAULT_RADIUS_KM: f64 = 0.5;

/// Competitor file errors
#[derive(Debug, thiserror::Error)]
pub enum CompetitorError {
    /// File could not be read
    #[error("failed to read competitor file {path}: {message}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// File is not a JSON array of stores
    #[error("failed to parse competitor file: {0}")]
    Parse(String),
}

/// A competitor store as found in the input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorStore {
    /// Store name
    #[serde(alias = "Store", alias = "store")]
    pub name: String,
    /// Latitude in degrees
    #[serde(alias = "Latitude", alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees
    #[serde(alias = "Longitude", alias = "lon", alias = "lng")]
    pub longitude: f64,
    /// District, if known
    #[serde(default, alias = "Kecamatan", skip_serializing_if = "Option::is_none")]
    pub kecamatan: Option<String>,
}

impl CompetitorStore {
    fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A competitor within range of an outlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyCompetitor {
    /// Store name
    pub name: String,
    /// Distance in kilometers, rounded to meters
    pub distance_km: f64,
    /// District, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kecamatan: Option<String>,
}

/// Competitor presence around one outlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSummary {
    /// Radius searched
    pub radius_km: f64,
    /// Stores within the radius
    pub count: usize,
    /// Closest store, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest: Option<NearbyCompetitor>,
}

/// Great-circle distance in kilometers
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// In-memory competitor list
#[derive(Debug, Clone, Default)]
pub struct CompetitorIndex {
    stores: Vec<CompetitorStore>,
}

impl CompetitorIndex {
    /// Load stores from a JSON array file, skipping invalid coordinates
    pub fn load(path: &Path) -> Result<Self, CompetitorError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CompetitorError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let stores: Vec<CompetitorStore> =
            serde_json::from_str(&contents).map_err(|e| CompetitorError::Parse(e.to_string()))?;
        let index = Self::from_stores(stores);
        info!(path = %path.display(), stores = index.len(), "Competitor stores loaded");
        Ok(index)
    }

    /// Build from stores, skipping invalid coordinates
    pub fn from_stores(stores: Vec<CompetitorStore>) -> Self {
        let stores = stores
            .into_iter()
            .filter(|store| {
                let valid = store.has_valid_coordinates();
                if !valid {
                    warn!(
                        store = %store.name,
                        latitude = store.latitude,
                        longitude = store.longitude,
                        "Skipping competitor with invalid coordinates"
                    );
                }
                valid
            })
            .collect();
        Self { stores }
    }

    /// Number of stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Stores within `radius_km`, nearest first
    pub fn nearby(&self, latitude: f64, longitude: f64, radius_km: f64) -> Vec<NearbyCompetitor> {
        let mut found: Vec<NearbyCompetitor> = self
            .stores
            .iter()
            .filter_map(|store| {
                let distance = haversine_km(latitude, longitude, store.latitude, store.longitude);
                (distance <= radius_km).then(|| NearbyCompetitor {
                    name: store.name.clone(),
                    distance_km: (distance * 1000.0).round() / 1000.0,
                    kecamatan: store.kecamatan.clone(),
                })
            })
            .collect();
        found.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        found
    }

    /// Count and nearest store within `radius_km`
    pub fn summarize(&self, latitude: f64, longitude: f64, radius_km: f64) -> CompetitorSummary {
        let nearby = self.nearby(latitude, longitude, radius_km);
        CompetitorSummary {
            radius_km,
            count: nearby.len(),
            nearest: nearby.into_iter().next(),
        }
    }
}
