//! Outlet list loading
//!
//! Accepts CSV (header row required) or a JSON array. Column names follow
//! the usual spreadsheet export headers; coordinates come either as separate
//! `latitude`/`longitude` columns or as one `coordinates` cell holding
//! `"lat, lon"`. Rows that cannot become a valid outlet are skipped with a
//! warning.

use super::CliError;
use crate::{parse_coordinates, Outlet};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// One input row before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutletRecord {
    /// Outlet identifier
    #[serde(alias = "ID", alias = "Id", alias = "outlet_id", alias = "Outlet ID")]
    pub id: String,
    /// Outlet name
    #[serde(default, alias = "Name", alias = "Outlet Name", alias = "Outlet")]
    pub name: Option<String>,
    /// District
    #[serde(default, alias = "Kecamatan")]
    pub kecamatan: Option<String>,
    /// Latitude in degrees
    #[serde(default, alias = "Latitude", alias = "lat")]
    pub latitude: Option<f64>,
    /// Longitude in degrees
    #[serde(default, alias = "Longitude", alias = "lon", alias = "lng")]
    pub longitude: Option<f64>,
    /// `"lat, lon"` text
    #[serde(default, alias = "Coordinates", alias = "Koordinat")]
    pub coordinates: Option<String>,
}

impl OutletRecord {
    /// Validate into an outlet
    pub fn into_outlet(self) -> Result<Outlet, String> {
        let (latitude, longitude) = match (self.latitude, self.longitude, self.coordinates.as_deref()) {
            (Some(lat), Some(lon), _) => (lat, lon),
            (_, _, Some(text)) if !text.trim().is_empty() => {
                parse_coordinates(text).map_err(|e| e.to_string())?
            }
            _ => return Err("missing coordinates".to_string()),
        };

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.id.clone());
        let outlet = Outlet::new(self.id.trim(), name, latitude, longitude).map_err(|e| e.to_string())?;
        Ok(match self.kecamatan.filter(|k| !k.trim().is_empty()) {
            Some(kecamatan) => outlet.with_kecamatan(kecamatan),
            None => outlet,
        })
    }
}

/// Load outlets from a CSV or JSON file
pub fn load_outlets(path: &Path) -> Result<Vec<Outlet>, CliError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let records = if is_json {
        read_json(path)?
    } else {
        read_csv(path)?
    };

    let total = records.len();
    let outlets: Vec<Outlet> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let id = record.id.clone();
            match record.into_outlet() {
                Ok(outlet) => Some(outlet),
                Err(reason) => {
                    warn!(row = index + 1, outlet_id = %id, reason = %reason, "Skipping outlet");
                    None
                }
            }
        })
        .collect();

    info!(
        path = %path.display(),
        loaded = outlets.len(),
        skipped = total - outlets.len(),
        "Outlets loaded"
    );
    Ok(outlets)
}

fn read_json(path: &Path) -> Result<Vec<OutletRecord>, CliError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CliError::InvalidInput(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| CliError::InvalidInput(format!("{}: {e}", path.display())))
}

fn read_csv(path: &Path) -> Result<Vec<OutletRecord>, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CliError::InvalidInput(format!("{}: {e}", path.display())))?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<OutletRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!(row = index + 1, error = %e, "Skipping unreadable CSV row"),
        }
    }
    Ok(records)
}
