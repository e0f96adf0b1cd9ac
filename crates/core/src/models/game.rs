//! The match aggregate and the staged next line.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    gender::GenderRatioConfig,
    point::{Point, PointStatus},
    Side, Winner,
};

/// Running score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub team: u32,
    pub opponent: u32,
}

impl Score {
    pub fn record(&mut self, winner: Winner) {
        match winner {
            Winner::Team => self.team += 1,
            Winner::Opponent => self.opponent += 1,
        }
    }
}

/// Which staged line a selection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Offense,
    Defense,
    #[default]
    Combined,
}

impl LineType {
    pub const ALL: [LineType; 3] = [LineType::Offense, LineType::Defense, LineType::Combined];

    pub fn label(self) -> &'static str {
        match self {
            LineType::Offense => "O line",
            LineType::Defense => "D line",
            LineType::Combined => "OD line",
        }
    }
}

/// Roster staged for the point that has not started yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NextLineBuffer {
    pub active_type: LineType,
    pub o_line: BTreeSet<String>,
    pub d_line: BTreeSet<String>,
    pub od_line: BTreeSet<String>,
    pub o_line_modified_at: Option<DateTime<Utc>>,
    pub d_line_modified_at: Option<DateTime<Utc>>,
    pub od_line_modified_at: Option<DateTime<Utc>>,
}

impl NextLineBuffer {
    pub fn line(&self, line: LineType) -> &BTreeSet<String> {
        match line {
            LineType::Offense => &self.o_line,
            LineType::Defense => &self.d_line,
            LineType::Combined => &self.od_line,
        }
    }

    pub fn modified_at(&self, line: LineType) -> Option<DateTime<Utc>> {
        match line {
            LineType::Offense => self.o_line_modified_at,
            LineType::Defense => self.d_line_modified_at,
            LineType::Combined => self.od_line_modified_at,
        }
    }

    /// Replace one line and stamp its modification time.
    pub fn set_line(&mut self, line: LineType, players: BTreeSet<String>, at: DateTime<Utc>) {
        let (slot, stamp) = match line {
            LineType::Offense => (&mut self.o_line, &mut self.o_line_modified_at),
            LineType::Defense => (&mut self.d_line, &mut self.d_line_modified_at),
            LineType::Combined => (&mut self.od_line, &mut self.od_line_modified_at),
        };
        *slot = players;
        *stamp = Some(at);
    }

    /// Line used for a point starting on `side`.
    pub fn players_for(&self, side: Side) -> &BTreeSet<String> {
        match (self.active_type, side) {
            (LineType::Combined, _) => &self.od_line,
            (_, Side::Offense) => &self.o_line,
            (_, Side::Defense) => &self.d_line,
        }
    }

    /// Adopt every remote line stamped later than ours. Returns the lines taken.
    pub fn merge_newer(&mut self, remote: &NextLineBuffer) -> Vec<LineType> {
        let mut adopted = Vec::new();
        for line in LineType::ALL {
            let Some(remote_at) = remote.modified_at(line) else {
                continue;
            };
            let newer = self
                .modified_at(line)
                .map(|local_at| remote_at > local_at)
                .unwrap_or(true);
            if newer {
                self.set_line(line, remote.line(line).clone(), remote_at);
                adopted.push(line);
            }
        }
        if !adopted.is_empty() {
            self.active_type = remote.active_type;
        }
        adopted
    }
}

/// Full match record, the unit of synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub team: String,
    pub opponent: String,
    pub starting_position: Side,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub game_start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub game_end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default)]
    pub pending_next_line: NextLineBuffer,
    #[serde(default)]
    pub gender_ratio_config: GenderRatioConfig,
}

impl Game {
    pub fn new(
        id: impl Into<String>,
        team: impl Into<String>,
        opponent: impl Into<String>,
        starting_position: Side,
    ) -> Self {
        Self {
            id: id.into(),
            team: team.into(),
            opponent: opponent.into(),
            starting_position,
            score: Score::default(),
            game_start_timestamp: None,
            game_end_timestamp: None,
            points: Vec::new(),
            pending_next_line: NextLineBuffer::default(),
            gender_ratio_config: GenderRatioConfig::default(),
        }
    }

    pub fn with_gender_ratio(mut self, config: GenderRatioConfig) -> Self {
        self.gender_ratio_config = config;
        self
    }

    pub fn current_point(&self) -> Option<&Point> {
        self.points.last()
    }

    pub fn current_point_mut(&mut self) -> Option<&mut Point> {
        self.points.last_mut()
    }

    pub fn current_point_index(&self) -> Option<usize> {
        self.points.len().checked_sub(1)
    }

    pub fn is_ended(&self) -> bool {
        self.game_end_timestamp.is_some()
    }

    /// `true` while the current point has started and has no winner.
    pub fn point_in_progress(&self) -> bool {
        self.current_point()
            .map(|point| point.status() == PointStatus::InProgress)
            .unwrap_or(false)
    }

    /// Side for the next point, recomputed from the full history.
    pub fn next_starting_position(&self) -> Side {
        determine_starting_position(self.starting_position, &self.points)
    }

    /// Append a not-yet-started point using the staged line for its side.
    pub fn prepare_next_point(&mut self) -> &mut Point {
        let side = self.next_starting_position();
        let players = self.pending_next_line.players_for(side).clone();
        self.points.push(Point::new(players, side));
        let index = self.points.len() - 1;
        &mut self.points[index]
    }

    /// Score derived from point winners.
    pub fn tally(&self) -> Score {
        let mut score = Score::default();
        for winner in self.points.iter().filter_map(|point| point.winner) {
            score.record(winner);
        }
        score
    }
}

/// Left fold over the point history starting from the game's initial side.
///
/// Recomputed on every call so retroactive edits are always reflected.
pub fn determine_starting_position(initial: Side, points: &[Point]) -> Side {
    points.iter().fold(initial, |side, point| {
        let switch_sides = point.switches_sides();
        match point.winner {
            Some(Winner::Team) if switch_sides => Side::Offense,
            Some(Winner::Team) => Side::Defense,
            Some(Winner::Opponent) if switch_sides => Side::Defense,
            Some(Winner::Opponent) => Side::Offense,
            None => side,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Event, OtherFlags};
    use chrono::Duration;

    fn completed(winner: Winner, switch: bool) -> Point {
        let mut point = Point::new(BTreeSet::new(), Side::Offense);
        if switch {
            point
                .append(Event::Other {
                    flags: OtherFlags {
                        switch_sides: true,
                        ..Default::default()
                    },
                })
                .unwrap();
        }
        point.complete(winner, Utc::now()).unwrap();
        point
    }

    #[test]
    fn starting_position_folds_over_history() {
        assert_eq!(
            determine_starting_position(Side::Offense, &[]),
            Side::Offense
        );
        let history = vec![completed(Winner::Team, false)];
        assert_eq!(
            determine_starting_position(Side::Offense, &history),
            Side::Defense
        );
        let history = vec![
            completed(Winner::Team, false),
            completed(Winner::Opponent, false),
        ];
        assert_eq!(
            determine_starting_position(Side::Offense, &history),
            Side::Offense
        );
        let history = vec![completed(Winner::Opponent, true)];
        assert_eq!(
            determine_starting_position(Side::Offense, &history),
            Side::Defense
        );
        let history = vec![completed(Winner::Team, true)];
        assert_eq!(
            determine_starting_position(Side::Defense, &history),
            Side::Offense
        );
    }

    #[test]
    fn starting_position_is_a_pure_replay() {
        let history = vec![
            completed(Winner::Team, false),
            completed(Winner::Team, true),
            completed(Winner::Opponent, false),
            Point::new(BTreeSet::new(), Side::Offense),
        ];
        let first = determine_starting_position(Side::Defense, &history);
        let second = determine_starting_position(Side::Defense, &history);
        assert_eq!(first, second);
        assert_eq!(first, Side::Offense);
    }

    #[test]
    fn next_point_takes_the_staged_line() {
        let mut game = Game::new("g1", "Us", "Them", Side::Offense);
        let now = Utc::now();
        game.pending_next_line.active_type = LineType::Offense;
        game.pending_next_line
            .set_line(LineType::Offense, ["A".to_string()].into(), now);
        game.pending_next_line
            .set_line(LineType::Defense, ["D".to_string()].into(), now);

        let point = game.prepare_next_point();
        assert_eq!(point.starting_position, Side::Offense);
        assert!(point.players.contains("A"));

        game.points[0].complete(Winner::Team, now).unwrap();
        let point = game.prepare_next_point();
        assert_eq!(point.starting_position, Side::Defense);
        assert!(point.players.contains("D"));
        assert_eq!(game.tally(), Score { team: 1, opponent: 0 });
    }

    #[test]
    fn merge_takes_only_newer_lines() {
        let now = Utc::now();
        let mut local = NextLineBuffer::default();
        local.set_line(LineType::Offense, ["Mine".to_string()].into(), now);

        let mut remote = NextLineBuffer::default();
        remote.set_line(
            LineType::Offense,
            ["Old".to_string()].into(),
            now - Duration::seconds(5),
        );
        remote.set_line(LineType::Defense, ["New".to_string()].into(), now);

        let adopted = local.merge_newer(&remote);
        assert_eq!(adopted, vec![LineType::Defense]);
        assert!(local.o_line.contains("Mine"));
        assert!(local.d_line.contains("New"));
    }

    #[test]
    fn record_shape_uses_camel_case() {
        let game = Game::new("g1", "Us", "Them", Side::Defense);
        let value = serde_json::to_value(&game).unwrap();
        assert_eq!(value["startingPosition"], "defense");
        assert_eq!(value["score"]["opponent"], 0);
        assert!(value["pendingNextLine"]["oLine"].is_array());
        assert_eq!(value["genderRatioConfig"]["mode"], "off");
    }
}
