//! Gender ratio rules for mixed division play.

use serde::{Deserialize, Serialize};

use super::Gender;

/// Which gender holds the majority on the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GenderRatio {
    #[serde(rename = "FMP")]
    #[default]
    Fmp,
    #[serde(rename = "MMP")]
    Mmp,
}

impl GenderRatio {
    pub fn inverse(self) -> Self {
        match self {
            GenderRatio::Fmp => GenderRatio::Mmp,
            GenderRatio::Mmp => GenderRatio::Fmp,
        }
    }
}

/// How the ratio is chosen per point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenderRatioMode {
    #[default]
    Off,
    Alternating,
    Fixed,
}

/// Rule `A B B A A B B`, indexed by point modulo its length.
const ALTERNATING_PATTERN: [bool; 7] = [true, false, false, true, true, false, false];

/// Player counts a line must field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCounts {
    pub fmp: usize,
    pub mmp: usize,
}

/// Outcome of checking a line against the ratio rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioCheck {
    /// Ratio tracking is off.
    NotApplicable,
    Satisfied,
    /// Soft warning; the line may still take the field.
    Mismatch {
        required: RequiredCounts,
        actual: RequiredCounts,
        unknown: usize,
    },
}

/// Ratio configuration carried on the game record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenderRatioConfig {
    pub mode: GenderRatioMode,
    pub starting_ratio: GenderRatio,
    pub players_on_field: usize,
}

impl Default for GenderRatioConfig {
    fn default() -> Self {
        Self {
            mode: GenderRatioMode::Off,
            starting_ratio: GenderRatio::Fmp,
            players_on_field: 7,
        }
    }
}

impl GenderRatioConfig {
    pub fn alternating(starting_ratio: GenderRatio) -> Self {
        Self {
            mode: GenderRatioMode::Alternating,
            starting_ratio,
            ..Self::default()
        }
    }

    pub fn fixed(majority: GenderRatio, players_on_field: usize) -> Self {
        Self {
            mode: GenderRatioMode::Fixed,
            starting_ratio: majority,
            players_on_field,
        }
    }

    /// Majority gender required for the point at `point_index` (0-based).
    pub fn required_ratio(&self, point_index: usize) -> Option<GenderRatio> {
        match self.mode {
            GenderRatioMode::Off => None,
            GenderRatioMode::Fixed => Some(self.starting_ratio),
            GenderRatioMode::Alternating => {
                if ALTERNATING_PATTERN[point_index % ALTERNATING_PATTERN.len()] {
                    Some(self.starting_ratio)
                } else {
                    Some(self.starting_ratio.inverse())
                }
            }
        }
    }

    pub fn required_counts(&self, point_index: usize) -> Option<RequiredCounts> {
        let ratio = self.required_ratio(point_index)?;
        let majority = self.players_on_field.div_ceil(2);
        let minority = self.players_on_field - majority;
        Some(match ratio {
            GenderRatio::Fmp => RequiredCounts {
                fmp: majority,
                mmp: minority,
            },
            GenderRatio::Mmp => RequiredCounts {
                fmp: minority,
                mmp: majority,
            },
        })
    }

    /// Compare a line's genders with the requirement for `point_index`.
    pub fn check(&self, point_index: usize, genders: impl IntoIterator<Item = Gender>) -> RatioCheck {
        let Some(required) = self.required_counts(point_index) else {
            return RatioCheck::NotApplicable;
        };
        let mut actual = RequiredCounts { fmp: 0, mmp: 0 };
        let mut unknown = 0;
        for gender in genders {
            match gender {
                Gender::Fmp => actual.fmp += 1,
                Gender::Mmp => actual.mmp += 1,
                Gender::Unknown => unknown += 1,
            }
        }
        if actual == required && unknown == 0 {
            RatioCheck::Satisfied
        } else {
            RatioCheck::Mismatch {
                required,
                actual,
                unknown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternating_follows_abbaabb() {
        let config = GenderRatioConfig::alternating(GenderRatio::Fmp);
        let ratios: Vec<_> = (0..7)
            .map(|index| config.required_ratio(index).unwrap())
            .collect();
        use GenderRatio::{Fmp, Mmp};
        assert_eq!(ratios, vec![Fmp, Mmp, Mmp, Fmp, Fmp, Mmp, Mmp]);
        assert_eq!(config.required_ratio(7), Some(Fmp));
    }

    #[test]
    fn fixed_split_depends_on_field_size() {
        let seven = GenderRatioConfig::fixed(GenderRatio::Mmp, 7);
        assert_eq!(
            seven.required_counts(3),
            Some(RequiredCounts { fmp: 3, mmp: 4 })
        );
        let five = GenderRatioConfig::fixed(GenderRatio::Fmp, 5);
        assert_eq!(
            five.required_counts(0),
            Some(RequiredCounts { fmp: 3, mmp: 2 })
        );
    }

    #[test]
    fn mismatch_is_reported_not_refused() {
        let config = GenderRatioConfig::fixed(GenderRatio::Fmp, 5);
        let line = [Gender::Fmp, Gender::Fmp, Gender::Mmp, Gender::Mmp, Gender::Mmp];
        assert!(matches!(
            config.check(0, line),
            RatioCheck::Mismatch { unknown: 0, .. }
        ));
        let good = [Gender::Fmp, Gender::Fmp, Gender::Fmp, Gender::Mmp, Gender::Mmp];
        assert_eq!(config.check(0, good), RatioCheck::Satisfied);
        assert_eq!(
            GenderRatioConfig::default().check(0, good),
            RatioCheck::NotApplicable
        );
    }
}
