//! Points, possessions and point timing.
//!
//! Timing accumulates *active* time: pausing folds the running interval into
//! `total_point_time`, resuming only restarts the interval. Elapsed time is
//! therefore exact under any number of pause/resume cycles.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{duration_ms, event::Event, Side, Winner};
use crate::error::MatchError;

/// Contiguous stretch of a point with one side holding the disc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Possession {
    pub offensive: bool,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Possession {
    pub fn new(side: Side) -> Self {
        Self {
            offensive: side.is_offense(),
            events: Vec::new(),
        }
    }

    pub fn side(&self) -> Side {
        Side::from_offensive(self.offensive)
    }
}

/// Lifecycle of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    NotStarted,
    InProgress,
    Completed(Winner),
}

/// One segment of play from a confirmed line until a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub players: BTreeSet<String>,
    pub starting_position: Side,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "Duration::zero", with = "duration_ms")]
    pub total_point_time: Duration,
    #[serde(default)]
    pub last_pause_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner: Option<Winner>,
    #[serde(default)]
    pub possessions: Vec<Possession>,
    /// Set when the line was confirmed for play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_confirmed_at: Option<DateTime<Utc>>,
}

impl Point {
    pub fn new(players: BTreeSet<String>, starting_position: Side) -> Self {
        Self {
            players,
            starting_position,
            start_timestamp: None,
            total_point_time: Duration::zero(),
            last_pause_time: None,
            winner: None,
            possessions: Vec::new(),
            line_confirmed_at: None,
        }
    }

    pub fn status(&self) -> PointStatus {
        if let Some(winner) = self.winner {
            return PointStatus::Completed(winner);
        }
        let touched = self.start_timestamp.is_some()
            || self.last_pause_time.is_some()
            || !self.possessions.is_empty()
            || self.total_point_time > Duration::zero();
        if touched {
            PointStatus::InProgress
        } else {
            PointStatus::NotStarted
        }
    }

    pub fn is_completed(&self) -> bool {
        self.winner.is_some()
    }

    /// `true` while the point clock is running.
    pub fn is_running(&self) -> bool {
        self.start_timestamp.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.last_pause_time.is_some()
    }

    /// Mark the line as confirmed. Events are only accepted afterwards.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), MatchError> {
        self.ensure_open()?;
        self.line_confirmed_at = Some(now);
        Ok(())
    }

    /// Points recorded before confirmation was tracked count as confirmed
    /// once play is on them.
    pub fn is_confirmed(&self) -> bool {
        self.line_confirmed_at.is_some() || self.status() != PointStatus::NotStarted
    }

    /// `true` once the clock has run at all.
    pub fn clock_started(&self) -> bool {
        self.start_timestamp.is_some()
            || self.last_pause_time.is_some()
            || self.total_point_time > Duration::zero()
    }

    /// Start the clock. Has no effect on a point whose clock already ran.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<bool, MatchError> {
        self.ensure_open()?;
        if self.clock_started() {
            return Ok(false);
        }
        self.start_timestamp = Some(now);
        Ok(true)
    }

    /// Fold the running interval into the total. Pausing a paused point is a no-op.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<bool, MatchError> {
        self.ensure_open()?;
        let Some(started) = self.start_timestamp.take() else {
            return Ok(false);
        };
        self.total_point_time = self.total_point_time + non_negative(now - started);
        self.last_pause_time = Some(now);
        Ok(true)
    }

    /// Restart a paused clock. Resuming a running point keeps its start
    /// timestamp and a clock that never ran stays stopped.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<bool, MatchError> {
        self.ensure_open()?;
        if self.start_timestamp.is_some() || !self.clock_started() {
            return Ok(false);
        }
        self.start_timestamp = Some(now);
        self.last_pause_time = None;
        Ok(true)
    }

    /// Active time on the clock.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.start_timestamp {
            Some(started) => self.total_point_time + non_negative(now - started),
            None => self.total_point_time,
        }
    }

    pub fn current_possession(&self) -> Option<&Possession> {
        self.possessions.last()
    }

    /// Open possession if it is on `side`, otherwise a freshly appended one.
    pub fn ensure_possession(&mut self, side: Side) -> &mut Possession {
        let matches = self
            .possessions
            .last()
            .map(|possession| possession.side() == side)
            .unwrap_or(false);
        if !matches {
            self.possessions.push(Possession::new(side));
        }
        let index = self.possessions.len() - 1;
        &mut self.possessions[index]
    }

    /// Side the next side-neutral event lands on.
    pub fn open_side(&self) -> Side {
        self.current_possession()
            .map(Possession::side)
            .unwrap_or(self.starting_position)
    }

    /// Append an event to the possession it requires, opening the successor
    /// possession when the event hands the disc over.
    pub fn append(&mut self, event: Event) -> Result<(), MatchError> {
        self.ensure_open()?;
        event.validate()?;
        let side = event.required_side().unwrap_or_else(|| self.open_side());
        let next = event.next_side();
        self.ensure_possession(side).events.push(event);
        if let Some(next) = next {
            self.ensure_possession(next);
        }
        Ok(())
    }

    /// Remove the most recent event, dropping possessions left empty.
    pub fn undo_last(&mut self) -> Result<Event, MatchError> {
        self.ensure_open()?;
        while self
            .possessions
            .last()
            .map(|possession| possession.events.is_empty())
            .unwrap_or(false)
        {
            self.possessions.pop();
        }
        let possession = self.possessions.last_mut().ok_or(MatchError::NothingToUndo)?;
        let event = possession.events.pop().ok_or(MatchError::NothingToUndo)?;
        if possession.events.is_empty() {
            self.possessions.pop();
        }
        Ok(event)
    }

    /// Close the point. The winner can only be set once.
    pub fn complete(&mut self, winner: Winner, now: DateTime<Utc>) -> Result<Duration, MatchError> {
        self.ensure_open()?;
        if let Some(started) = self.start_timestamp.take() {
            self.total_point_time = self.total_point_time + non_negative(now - started);
        }
        self.last_pause_time = None;
        self.winner = Some(winner);
        Ok(self.total_point_time)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.possessions
            .iter()
            .flat_map(|possession| possession.events.iter())
    }

    /// XOR of every side-switch marker recorded in the point.
    pub fn switches_sides(&self) -> bool {
        self.events()
            .filter(|event| event.is_side_switch())
            .fold(false, |switch, _| !switch)
    }

    fn ensure_open(&self) -> Result<(), MatchError> {
        if self.winner.is_some() {
            return Err(MatchError::PointAlreadyCompleted);
        }
        Ok(())
    }
}

fn non_negative(duration: Duration) -> Duration {
    duration.max(Duration::zero())
}
