//! Analysis report
//!
//! Joins the input outlets with their recorded results (and competitor
//! presence, when a competitor list is given) and adds a run summary. The
//! JSON written here is what spreadsheet and map exporters consume.

use crate::competitor::{CompetitorIndex, CompetitorSummary};
use crate::resume::ProgressState;
use crate::{FacilityCategory, Outlet, OutletFacilityResult, OutletStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Report export errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// File system failure
    #[error("IO error: {0}")]
    Io(String),

    /// JSON encoding failure
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Status of an outlet in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every category counted
    Complete,
    /// Some categories failed
    Partial,
    /// Every category failed
    Failed,
    /// No result recorded yet
    Pending,
}

impl From<OutletStatus> for ReportStatus {
    fn from(status: OutletStatus) -> Self {
        match status {
            OutletStatus::Complete => ReportStatus::Complete,
            OutletStatus::Partial => ReportStatus::Partial,
            OutletStatus::Failed => ReportStatus::Failed,
        }
    }
}

/// One outlet row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Input outlet
    pub outlet: Outlet,
    /// Outcome
    pub status: ReportStatus,
    /// Facility result, absent while pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OutletFacilityResult>,
    /// Competitor presence, when a competitor list was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitors: Option<CompetitorSummary>,
}

/// How many analyzed outlets have a category present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPresence {
    /// Category
    pub category: FacilityCategory,
    /// Outlets with at least one facility of the category
    pub outlets: usize,
    /// Share of analyzed outlets, in percent (one decimal)
    pub percentage: f64,
}

/// Aggregate figures of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Outlets in the report
    pub total_outlets: usize,
    /// Outlets with every category counted
    pub complete: usize,
    /// Outlets with some categories failed
    pub partial: usize,
    /// Outlets with every category failed
    pub failed: usize,
    /// Outlets without a result
    pub pending: usize,
    /// Presence per category over analyzed outlets
    pub category_presence: Vec<CategoryPresence>,
    /// Outlets per star rating (1-5)
    pub rating_distribution: BTreeMap<u8, usize>,
    /// Most categories present at any outlet
    pub max_categories_present: u8,
    /// Outlets reaching that maximum
    pub top_outlets: Vec<String>,
    /// Outlets with at least one competitor in range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlets_with_competitors: Option<usize>,
}

/// Full report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Creation time
    pub generated_at: DateTime<Utc>,
    /// Fingerprint of the run the results came from
    pub run_fingerprint: String,
    /// Aggregate figures
    pub summary: RunSummary,
    /// Outlets in input order
    pub outlets: Vec<ReportEntry>,
}

impl AnalysisReport {
    /// Build a report; repeated outlet ids keep their first occurrence
    pub fn build(
        outlets: &[Outlet],
        state: &ProgressState,
        competitors: Option<&CompetitorIndex>,
        competitor_radius_km: f64,
    ) -> Self {
        let mut seen = HashSet::new();
        let entries: Vec<ReportEntry> = outlets
            .iter()
            .filter(|outlet| seen.insert(outlet.id.as_str()))
            .map(|outlet| {
                let result = state.result(&outlet.id).cloned();
                ReportEntry {
                    outlet: outlet.clone(),
                    status: result
                        .as_ref()
                        .map(|r| ReportStatus::from(r.status))
                        .unwrap_or(ReportStatus::Pending),
                    result,
                    competitors: competitors.map(|index| {
                        index.summarize(outlet.latitude, outlet.longitude, competitor_radius_km)
                    }),
                }
            })
            .collect();

        let summary = summarize(&entries, competitors.is_some());
        Self {
            generated_at: Utc::now(),
            run_fingerprint: state.fingerprint().to_string(),
            summary,
            outlets: entries,
        }
    }

    /// Write pretty JSON atomically
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ReportError::Serialization(e.to_string()))?;

        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent_dir).map_err(|e| ReportError::Io(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ReportError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .and_then(|_| temp_file.flush())
            .map_err(|e| ReportError::Io(format!("Failed to write report: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ReportError::Io(format!("Failed to sync report: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ReportError::Io(format!("Failed to persist report: {e}")))?;

        info!(path = %path.display(), outlets = self.outlets.len(), "Report written");
        Ok(())
    }
}

fn summarize(entries: &[ReportEntry], with_competitors: bool) -> RunSummary {
    let count = |status: ReportStatus| entries.iter().filter(|e| e.status == status).count();
    let results: Vec<&OutletFacilityResult> =
        entries.iter().filter_map(|e| e.result.as_ref()).collect();

    let category_presence = FacilityCategory::ALL
        .into_iter()
        .map(|category| {
            let outlets = results.iter().filter(|r| r.is_present(category)).count();
            let percentage = if results.is_empty() {
                0.0
            } else {
                (outlets as f64 / results.len() as f64 * 1000.0).round() / 10.0
            };
            CategoryPresence {
                category,
                outlets,
                percentage,
            }
        })
        .collect();

    let mut rating_distribution: BTreeMap<u8, usize> = (1..=5).map(|stars| (stars, 0)).collect();
    for result in &results {
        *rating_distribution.entry(result.star_rating).or_insert(0) += 1;
    }

    let max_categories_present = results
        .iter()
        .map(|r| r.categories_present)
        .max()
        .unwrap_or(0);
    let top_outlets = if results.is_empty() {
        Vec::new()
    } else {
        results
            .iter()
            .filter(|r| r.categories_present == max_categories_present)
            .map(|r| r.outlet_id.clone())
            .collect()
    };

    let outlets_with_competitors = with_competitors.then(|| {
        entries
            .iter()
            .filter(|e| e.competitors.as_ref().map(|c| c.count > 0).unwrap_or(false))
            .count()
    });

    RunSummary {
        total_outlets: entries.len(),
        complete: count(ReportStatus::Complete),
        partial: count(ReportStatus::Partial),
        failed: count(ReportStatus::Failed),
        pending: count(ReportStatus::Pending),
        category_presence,
        rating_distribution,
        max_categories_present,
        top_outlets,
        outlets_with_competitors,
    }
}
