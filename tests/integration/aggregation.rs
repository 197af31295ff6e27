//! Integration tests for per-outlet aggregation, escalation and rating

use crate::support::{self, fast_policy, ScriptedProvider};
use outlet_facility_analyzer::config::EscalationTrigger;
use outlet_facility_analyzer::fetcher::{AttemptErrorType, FetchErrorKind};
use outlet_facility_analyzer::{FacilityCategory, OutletStatus};
use std::sync::Arc;

/// Provider where the first `present` categories (reporting order) find one facility
fn first_categories_present(present: usize) -> ScriptedProvider {
    ScriptedProvider::new(move |_, query| {
        let position = FacilityCategory::ALL
            .iter()
            .position(|c| *c == query.category())
            .unwrap_or(usize::MAX);
        Ok(u32::from(position < present))
    })
}

#[tokio::test]
async fn test_star_rating_follows_categories_present() {
    for (present, expected_stars) in [(0, 1), (1, 1), (2, 2), (5, 3), (7, 4), (8, 5), (9, 5)] {
        let provider = Arc::new(first_categories_present(present));
        let client = support::client(provider, 1, fast_policy(3, 8), support::shutdown());
        let aggregator = support::aggregator(client, EscalationTrigger::Never);

        let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

        assert_eq!(result.status, OutletStatus::Complete);
        assert_eq!(usize::from(result.categories_present), present);
        assert_eq!(result.star_rating, expected_stars, "{present} categories present");
        assert_eq!(result.per_category_count.len(), 9);
        assert!(result.failed_categories.is_empty());
    }
}

#[tokio::test]
async fn test_empty_category_escalates_only_zero_counts() {
    let provider = Arc::new(ScriptedProvider::new(|_, query| {
        match (query.category(), query.radius_m()) {
            (FacilityCategory::Culinary, 100) => Ok(0),
            (FacilityCategory::Culinary, _) => Ok(2),
            _ => Ok(1),
        }
    }));
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyCategory);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(result.per_category_count[&FacilityCategory::Culinary], 2);
    assert_eq!(result.radius_used_m[&FacilityCategory::Culinary], 200);
    assert_eq!(result.radius_used_m[&FacilityCategory::Education], 100);
    assert_eq!(result.categories_present, 9);
    assert_eq!(result.star_rating, 5);
    assert_eq!(provider.call_count(), 10);
}

#[tokio::test]
async fn test_empty_outlet_escalates_everything_when_all_zero() {
    let provider = Arc::new(ScriptedProvider::new(|_, query| {
        match (query.category(), query.radius_m()) {
            (_, 100) => Ok(0),
            (FacilityCategory::HospitalClinic, _) => Ok(3),
            _ => Ok(0),
        }
    }));
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyOutlet);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(provider.call_count(), 18);
    assert!(result.radius_used_m.values().all(|radius| *radius == 200));
    assert_eq!(result.categories_present, 1);
    assert_eq!(result.present_categories(), vec![FacilityCategory::HospitalClinic]);
}

#[tokio::test]
async fn test_empty_outlet_skips_escalation_when_anything_found() {
    let provider = Arc::new(first_categories_present(1));
    let client = support::client(provider.clone(), 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyOutlet);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(provider.call_count(), 9);
    assert_eq!(result.categories_present, 1);
}

#[tokio::test]
async fn test_failed_escalation_keeps_base_count() {
    let provider = Arc::new(ScriptedProvider::new(|_, query| {
        match (query.category(), query.radius_m()) {
            (FacilityCategory::PublicArea, 200) => Err(AttemptErrorType::InvalidQuery),
            (FacilityCategory::PublicArea, _) => Ok(0),
            _ => Ok(1),
        }
    }));
    let client = support::client(provider, 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyCategory);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(result.status, OutletStatus::Complete);
    assert_eq!(result.per_category_count[&FacilityCategory::PublicArea], 0);
    assert_eq!(result.radius_used_m[&FacilityCategory::PublicArea], 100);
    assert_eq!(result.categories_present, 8);
}

#[tokio::test]
async fn test_partial_outlet_keeps_counted_categories() {
    let provider = Arc::new(ScriptedProvider::new(|_, query| {
        if query.category() == FacilityCategory::Education {
            Err(AttemptErrorType::InvalidQuery)
        } else {
            Ok(2)
        }
    }));
    let client = support::client(provider, 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::Never);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(result.status, OutletStatus::Partial);
    assert_eq!(result.per_category_count.len(), 8);
    assert!(!result.per_category_count.contains_key(&FacilityCategory::Education));
    assert_eq!(
        result.failed_categories[&FacilityCategory::Education].kind,
        FetchErrorKind::MalformedQuery
    );
    assert_eq!(result.categories_present, 8);
    assert_eq!(result.star_rating, 5);
}

#[tokio::test]
async fn test_all_categories_failing_is_failed() {
    let provider = Arc::new(ScriptedProvider::new(|_, _| Err(AttemptErrorType::ClientError(400))));
    let client = support::client(provider, 1, fast_policy(3, 8), support::shutdown());
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyCategory);

    let result = aggregator.analyze(&support::outlet(0)).await.unwrap();

    assert_eq!(result.status, OutletStatus::Failed);
    assert!(result.per_category_count.is_empty());
    assert_eq!(result.failed_categories.len(), 9);
    assert_eq!(result.categories_present, 0);
    assert_eq!(result.star_rating, 1);
}

#[tokio::test]
async fn test_cancelled_outlet_yields_no_result() {
    let provider = Arc::new(ScriptedProvider::constant(1));
    let shutdown = support::shutdown();
    shutdown.request_shutdown("test");
    let client = support::client(provider, 1, fast_policy(3, 8), shutdown);
    let aggregator = support::aggregator(client, EscalationTrigger::EmptyCategory);

    let outlet = support::outlet(0);
    let interrupted = aggregator.analyze(&outlet).await.unwrap_err();

    assert_eq!(interrupted.outlet_id, outlet.id);
}
