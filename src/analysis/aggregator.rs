//! Per-outlet facility aggregation
//!
//! Resolves all nine categories of one outlet concurrently, applies the
//! radius escalation policy, and turns the counts into a status and a star
//! rating.

use crate::analysis::rating::RatingTable;
use crate::config::{AnalyzerConfig, CategoryTable, ConfigError, EscalationTrigger, ResolvedCategory};
use crate::fetcher::{FetchErrorKind, RetryingClient};
use crate::metrics::OutletMetrics;
use crate::{CategoryFailure, FacilityCategory, Outlet, OutletFacilityResult, OutletStatus};
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Outcome of one category for one outlet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    /// Count obtained
    Counted {
        /// Facilities found
        count: u32,
        /// Radius that produced the count
        radius_m: u32,
        /// Whether this is the escalated radius
        escalated: bool,
    },
    /// Count could not be obtained
    Failed(CategoryFailure),
}

impl CategoryOutcome {
    fn is_cancelled(&self) -> bool {
        matches!(self, CategoryOutcome::Failed(f) if f.kind == FetchErrorKind::Cancelled)
    }

    fn is_empty_base(&self) -> bool {
        matches!(
            self,
            CategoryOutcome::Counted {
                count: 0,
                escalated: false,
                ..
            }
        )
    }
}

/// The outlet could not finish because the run was cancelled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("analysis of outlet {outlet_id} was interrupted")]
pub struct AnalysisInterrupted {
    /// Outlet left pending
    pub outlet_id: String,
}

/// Counts facilities around outlets and rates them
pub struct FacilityAggregator {
    client: Arc<RetryingClient>,
    categories: Arc<CategoryTable>,
    rating: RatingTable,
    escalation: EscalationTrigger,
}

impl FacilityAggregator {
    /// Create an aggregator
    pub fn new(
        client: Arc<RetryingClient>,
        categories: CategoryTable,
        rating: RatingTable,
        escalation: EscalationTrigger,
    ) -> Self {
        Self {
            client,
            categories: Arc::new(categories),
            rating,
            escalation,
        }
    }

    /// Create an aggregator from configuration
    pub fn from_config(
        client: Arc<RetryingClient>,
        config: &AnalyzerConfig,
    ) -> Result<Self, ConfigError> {
        config
            .rating
            .validate()
            .map_err(|e| ConfigError::invalid("rating.tiers", e.to_string()))?;
        Ok(Self::new(
            client,
            config.category_table()?,
            config.rating.clone(),
            config.escalation,
        ))
    }

    /// Category table in use
    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Rating table in use
    pub fn rating(&self) -> &RatingTable {
        &self.rating
    }

    /// Escalation policy in use
    pub fn escalation(&self) -> EscalationTrigger {
        self.escalation
    }

    /// Analyze one outlet
    ///
    /// Returns [`AnalysisInterrupted`] when any category was cancelled; no
    /// partial result is produced for an interrupted outlet.
    pub async fn analyze(&self, outlet: &Outlet) -> Result<OutletFacilityResult, AnalysisInterrupted> {
        let span = info_span!("analyze_outlet", outlet_id = %outlet.id);
        self.analyze_inner(outlet).instrument(span).await
    }

    async fn analyze_inner(&self, outlet: &Outlet) -> Result<OutletFacilityResult, AnalysisInterrupted> {
        let metrics = OutletMetrics::start(&outlet.id);
        let entries: Vec<&ResolvedCategory> = self.categories.iter().collect();

        let mut outcomes: Vec<CategoryOutcome> = join_all(
            entries
                .iter()
                .map(|entry| self.count(entry, outlet, entry.radius_m(), false)),
        )
        .await;

        let escalate: Vec<usize> = match self.escalation {
            EscalationTrigger::Never => Vec::new(),
            EscalationTrigger::EmptyCategory => outcomes
                .iter()
                .enumerate()
                .filter(|(_, outcome)| outcome.is_empty_base())
                .map(|(index, _)| index)
                .collect(),
            EscalationTrigger::EmptyOutlet => {
                if outcomes.iter().all(CategoryOutcome::is_empty_base) {
                    (0..outcomes.len()).collect()
                } else {
                    Vec::new()
                }
            }
        };

        if !escalate.is_empty() && !outcomes.iter().any(CategoryOutcome::is_cancelled) {
            debug!(categories = escalate.len(), "Escalating search radius");
            let escalated = join_all(escalate.iter().map(|&index| {
                let entry = entries[index];
                self.count(entry, outlet, entry.escalated_radius_m(), true)
            }))
            .await;

            for (index, outcome) in escalate.into_iter().zip(escalated) {
                if let CategoryOutcome::Failed(failure) = &outcome {
                    if failure.kind != FetchErrorKind::Cancelled {
                        warn!(
                            category = %entries[index].category(),
                            error = %failure.cause,
                            "Escalated query failed, keeping base-radius count"
                        );
                        continue;
                    }
                }
                outcomes[index] = outcome;
            }
        }

        if outcomes.iter().any(CategoryOutcome::is_cancelled) {
            debug!("Outlet interrupted by cancellation");
            return Err(AnalysisInterrupted {
                outlet_id: outlet.id.clone(),
            });
        }

        let categories = entries.iter().map(|entry| entry.category());
        let result = self.build_result(outlet, categories.zip(outcomes));
        metrics.record(result.status, result.categories_present);

        info!(
            status = %result.status,
            categories_present = result.categories_present,
            star_rating = result.star_rating,
            failed = result.failed_categories.len(),
            "Outlet analyzed"
        );
        Ok(result)
    }

    async fn count(
        &self,
        entry: &ResolvedCategory,
        outlet: &Outlet,
        radius_m: u32,
        escalated: bool,
    ) -> CategoryOutcome {
        let query = entry.query(outlet.latitude, outlet.longitude, radius_m);
        match self.client.fetch(&query).await {
            Ok(found) => CategoryOutcome::Counted {
                count: found.count,
                radius_m,
                escalated,
            },
            Err(e) => CategoryOutcome::Failed(CategoryFailure {
                kind: e.kind,
                cause: e.last_cause,
            }),
        }
    }

    fn build_result(
        &self,
        outlet: &Outlet,
        outcomes: impl Iterator<Item = (FacilityCategory, CategoryOutcome)>,
    ) -> OutletFacilityResult {
        let mut per_category_count = BTreeMap::new();
        let mut radius_used_m = BTreeMap::new();
        let mut failed_categories = BTreeMap::new();

        for (category, outcome) in outcomes {
            match outcome {
                CategoryOutcome::Counted { count, radius_m, .. } => {
                    per_category_count.insert(category, count);
                    radius_used_m.insert(category, radius_m);
                }
                CategoryOutcome::Failed(failure) => {
                    failed_categories.insert(category, failure);
                }
            }
        }

        let present = per_category_count.values().filter(|count| **count > 0).count();
        let status = OutletStatus::from_counts(per_category_count.len(), failed_categories.len());

        OutletFacilityResult {
            outlet_id: outlet.id.clone(),
            per_category_count,
            failed_categories,
            radius_used_m,
            categories_present: u8::try_from(present).unwrap_or(u8::MAX),
            star_rating: self.rating.stars_for(present),
            status,
            analyzed_at: Utc::now(),
        }
    }
}
