#![allow(missing_docs)]

//! Shared domain models.

pub mod event;
pub mod game;
pub mod gender;
pub mod point;

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

pub use event::{
    DefenseFlag, DefenseFlags, Event, FlagConflict, OtherFlags, PullFlag, PullFlags, PullQuality,
    ThrowFlags, TurnoverFlag, TurnoverFlags, ViolationFlags,
};
pub use game::{determine_starting_position, Game, LineType, NextLineBuffer, Score};
pub use gender::{GenderRatio, GenderRatioConfig, GenderRatioMode, RatioCheck, RequiredCounts};
pub use point::{Point, PointStatus, Possession};

/// Which side of the disc a team is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Holding the disc.
    Offense,
    /// Defending against the disc.
    Defense,
}

impl Side {
    /// The opposite side.
    pub fn flipped(self) -> Self {
        match self {
            Side::Offense => Side::Defense,
            Side::Defense => Side::Offense,
        }
    }

    /// `true` when this is the offensive side.
    pub fn is_offense(self) -> bool {
        matches!(self, Side::Offense)
    }

    pub(crate) fn from_offensive(offensive: bool) -> Self {
        if offensive {
            Side::Offense
        } else {
            Side::Defense
        }
    }
}

/// Which team took a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// Our team.
    Team,
    /// The opposing team.
    Opponent,
}

/// Gender matching category used for ratio rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Gender {
    /// Female matching player.
    #[serde(rename = "FMP")]
    Fmp,
    /// Male matching player.
    #[serde(rename = "MMP")]
    Mmp,
    /// Category not recorded.
    #[default]
    Unknown,
}

/// A rostered player with cumulative statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Display name, also the identity used by events and lines.
    pub name: String,
    /// Jersey number as printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    /// Gender matching category.
    #[serde(default)]
    pub gender: Gender,
    /// Goals scored.
    #[serde(default)]
    pub goals: u32,
    /// Assists thrown.
    #[serde(default)]
    pub assists: u32,
    /// Completed points played.
    #[serde(default)]
    pub points_played: u32,
    /// Accumulated active time on field.
    #[serde(default = "Duration::zero", with = "duration_ms")]
    pub time_played: Duration,
}

impl Player {
    /// Create a player with no recorded statistics.
    pub fn new(name: impl Into<String>, gender: Gender) -> Self {
        Self {
            name: name.into(),
            number: None,
            gender,
            goals: 0,
            assists: 0,
            points_played: 0,
            time_played: Duration::zero(),
        }
    }

    /// Attach a jersey number.
    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// Players known to the session, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    players: BTreeMap<String, Player>,
}

impl Roster {
    pub fn new(players: impl IntoIterator<Item = Player>) -> Self {
        Self {
            players: players
                .into_iter()
                .map(|player| (player.name.clone(), player))
                .collect(),
        }
    }

    pub fn insert(&mut self, player: Player) {
        self.players.insert(player.name.clone(), player);
    }

    pub fn get(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.players.contains_key(name)
    }

    /// Gender of a player, `Unknown` for names not on the roster.
    pub fn gender_of(&self, name: &str) -> Gender {
        self.get(name)
            .map(|player| player.gender)
            .unwrap_or(Gender::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Serialize a `chrono::Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_round_trips_camel_case() {
        let mut player = Player::new("Alex", Gender::Fmp).with_number("7");
        player.time_played = Duration::seconds(95);
        let value = serde_json::to_value(&player).unwrap();
        assert_eq!(value["gender"], "FMP");
        assert_eq!(value["timePlayed"], 95_000);
        assert_eq!(value["pointsPlayed"], 0);

        let decoded: Player = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, player);
    }

    #[test]
    fn roster_reports_unknown_gender_for_strangers() {
        let roster = Roster::new([Player::new("Sam", Gender::Mmp)]);
        assert_eq!(roster.gender_of("Sam"), Gender::Mmp);
        assert_eq!(roster.gender_of("Nobody"), Gender::Unknown);
    }
}
