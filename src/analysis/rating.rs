//! Star rating from the number of facility categories present.
//!
//! The thresholds are configuration data:
//!
//! ```toml
//! [[rating.tiers]]
//! min_present = 0
//! stars = 1
//!
//! [[rating.tiers]]
//! min_present = 2
//! stars = 2
//! ```
//!
//! Validation guarantees the mapping is monotonic: more categories present
//! never yields fewer stars.

use serde::{Deserialize, Serialize};

/// Lowest star value
pub const MIN_STARS: u8 = 1;
/// Highest star value
pub const MAX_STARS: u8 = 5;

/// One threshold: `min_present` or more categories earn `stars`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatingTier {
    /// Minimum number of categories present
    pub min_present: usize,
    /// Stars awarded (1-5)
    pub stars: u8,
}

/// Rating table validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatingTableError {
    /// No tiers configured
    #[error("rating table must have at least one tier")]
    Empty,

    /// Lowest tier does not start at zero categories
    #[error("first tier must have min_present = 0, found {0}")]
    FirstTierNotZero(usize),

    /// Thresholds out of order or repeated
    #[error("min_present must be strictly increasing ({previous} then {next})")]
    NotIncreasing {
        /// Earlier threshold
        previous: usize,
        /// Offending threshold
        next: usize,
    },

    /// Star value outside 1-5
    #[error("stars must be within 1..=5, found {0}")]
    StarsOutOfRange(u8),

    /// Stars drop as presence grows
    #[error("stars must not decrease ({previous} then {next})")]
    StarsDecrease {
        /// Earlier stars
        previous: u8,
        /// Offending stars
        next: u8,
    },
}

/// Ordered rating thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatingTable {
    tiers: Vec<RatingTier>,
}

impl Default for RatingTable {
    /// 0-1 present: 1 star, 2-3: 2, 4-5: 3, 6-7: 4, 8-9: 5
    fn default() -> Self {
        let tier = |min_present, stars| RatingTier { min_present, stars };
        Self {
            tiers: vec![tier(0, 1), tier(2, 2), tier(4, 3), tier(6, 4), tier(8, 5)],
        }
    }
}

impl RatingTable {
    /// Build and validate a table
    pub fn new(tiers: Vec<RatingTier>) -> Result<Self, RatingTableError> {
        let table = Self { tiers };
        table.validate()?;
        Ok(table)
    }

    /// Thresholds in ascending order
    pub fn tiers(&self) -> &[RatingTier] {
        &self.tiers
    }

    /// Check ordering and ranges
    pub fn validate(&self) -> Result<(), RatingTableError> {
        let first = self.tiers.first().ok_or(RatingTableError::Empty)?;
        if first.min_present != 0 {
            return Err(RatingTableError::FirstTierNotZero(first.min_present));
        }
        for tier in &self.tiers {
            if !(MIN_STARS..=MAX_STARS).contains(&tier.stars) {
                return Err(RatingTableError::StarsOutOfRange(tier.stars));
            }
        }
        for pair in self.tiers.windows(2) {
            let (previous, next) = (pair[0], pair[1]);
            if next.min_present <= previous.min_present {
                return Err(RatingTableError::NotIncreasing {
                    previous: previous.min_present,
                    next: next.min_present,
                });
            }
            if next.stars < previous.stars {
                return Err(RatingTableError::StarsDecrease {
                    previous: previous.stars,
                    next: next.stars,
                });
            }
        }
        Ok(())
    }

    /// Stars for a number of categories present
    pub fn stars_for(&self, categories_present: usize) -> u8 {
        self.tiers
            .iter()
            .take_while(|tier| tier.min_present <= categories_present)
            .last()
            .map(|tier| tier.stars)
            .unwrap_or(MIN_STARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = RatingTable::default();
        table.validate().unwrap();
        let stars: Vec<u8> = (0..=9).map(|n| table.stars_for(n)).collect();
        assert_eq!(stars, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_invalid_tables() {
        let tier = |min_present, stars| RatingTier { min_present, stars };
        assert_eq!(RatingTable::new(vec![]), Err(RatingTableError::Empty));
        assert_eq!(
            RatingTable::new(vec![tier(1, 1)]),
            Err(RatingTableError::FirstTierNotZero(1))
        );
        assert!(matches!(
            RatingTable::new(vec![tier(0, 1), tier(3, 2), tier(3, 3)]),
            Err(RatingTableError::NotIncreasing { .. })
        ));
        assert!(matches!(
            RatingTable::new(vec![tier(0, 2), tier(3, 1)]),
            Err(RatingTableError::StarsDecrease { .. })
        ));
        assert_eq!(
            RatingTable::new(vec![tier(0, 0)]),
            Err(RatingTableError::StarsOutOfRange(0))
        );
    }

    #[test]
    fn test_custom_table_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            rating: RatingTable,
        }
        let toml = r#"
            [[rating.tiers]]
            min_present = 0
            stars = 1

            [[rating.tiers]]
            min_present = 5
            stars = 5
        "#;
        let wrapper: Wrapper = toml::from_str(toml).unwrap();
        assert_eq!(wrapper.rating.stars_for(4), 1);
        assert_eq!(wrapper.rating.stars_for(9), 5);
    }
}
