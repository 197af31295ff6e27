//! Unit tests for star rating thresholds

use outlet_facility_analyzer::analysis::{RatingTable, RatingTier};
use outlet_facility_analyzer::config::AnalyzerConfig;

#[test]
fn test_default_table_is_monotonic() {
    let table = RatingTable::default();
    let stars: Vec<u8> = (0..=9).map(|present| table.stars_for(present)).collect();
    assert_eq!(stars, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    assert!(stars.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_custom_table_from_config() {
    let toml = r#"
        [rating]
        tiers = [
            { min_present = 0, stars = 1 },
            { min_present = 3, stars = 3 },
            { min_present = 9, stars = 5 },
        ]
    "#;
    let config = AnalyzerConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.rating.stars_for(2), 1);
    assert_eq!(config.rating.stars_for(3), 3);
    assert_eq!(config.rating.stars_for(8), 3);
    assert_eq!(config.rating.stars_for(9), 5);
}

#[test]
fn test_invalid_tables_rejected() {
    let tier = |min_present, stars| RatingTier { min_present, stars };

    assert!(RatingTable::new(vec![]).is_err());
    assert!(RatingTable::new(vec![tier(1, 1)]).is_err());
    assert!(RatingTable::new(vec![tier(0, 1), tier(0, 2)]).is_err());
    assert!(RatingTable::new(vec![tier(0, 3), tier(4, 2)]).is_err());
    assert!(RatingTable::new(vec![tier(0, 0)]).is_err());
    assert!(RatingTable::new(vec![tier(0, 1), tier(5, 6)]).is_err());
    assert!(RatingTable::new(vec![tier(0, 1), tier(5, 5)]).is_ok());
}

#[test]
fn test_config_with_decreasing_stars_fails_validation() {
    let toml = r#"
        [rating]
        tiers = [{ min_present = 0, stars = 4 }, { min_present = 2, stars = 2 }]
    "#;
    let err = AnalyzerConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("rating"));
}

#[test]
fn test_map_legend_cutoffs_load_as_config() {
    let toml = r#"
        [rating]
        tiers = [
            { min_present = 0, stars = 1 },
            { min_present = 1, stars = 2 },
            { min_present = 3, stars = 3 },
            { min_present = 5, stars = 4 },
            { min_present = 7, stars = 5 },
        ]
    "#;
    let config = AnalyzerConfig::from_toml_str(toml).unwrap();
    let stars: Vec<u8> = (0..=9).map(|present| config.rating.stars_for(present)).collect();
    assert_eq!(stars, vec![1, 2, 2, 3, 3, 4, 4, 5, 5, 5]);
}
