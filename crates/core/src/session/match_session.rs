use std::{collections::BTreeSet, mem, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::collaborators::{Clock, Notice, Notifier, Persistence, SystemClock};
use crate::{
    controller::{ControllerState, Permissions, Role},
    error::{MatchError, MatchResult},
    models::{
        DefenseFlags, Event, Game, LineType, NextLineBuffer, OtherFlags, Point, PointStatus,
        Possession, PullFlags, PullQuality, RatioCheck, Roster, Score, Side, ThrowFlags,
        TurnoverFlags, ViolationFlags, Winner,
    },
    sync::LineConflictDetector,
};

/// When the point clock starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Goals only; the clock starts when the line is confirmed.
    Streamlined,
    /// Full event tracking; the clock starts with the first recorded event.
    #[default]
    PlayByPlay,
}

/// Identity of the local device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub display_name: String,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Live match owned by one device.
///
/// Every mutation checks the role that gates it, validates before changing
/// anything, then commits the full game to the persistence collaborator.
pub struct MatchSession {
    game: Game,
    roster: Roster,
    device: DeviceIdentity,
    controller: ControllerState,
    mode: ScoringMode,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    notifier: Option<Arc<dyn Notifier>>,
    line_conflicts: LineConflictDetector,
    next_line_dirty: bool,
}

impl MatchSession {
    pub fn new(game: Game, roster: Roster, device: DeviceIdentity) -> Self {
        Self {
            game,
            roster,
            device,
            controller: ControllerState::default(),
            mode: ScoringMode::default(),
            clock: Arc::new(SystemClock),
            persistence: None,
            notifier: None,
            line_conflicts: LineConflictDetector::new(Duration::seconds(5)),
            next_line_dirty: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mode(mut self, mode: ScoringMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_conflict_window(mut self, window: Duration) -> Self {
        self.line_conflicts = LineConflictDetector::new(window);
        self
    }

    /// Commit the final state and hand the game back.
    pub fn close(self) -> Game {
        self.commit();
        info!(game_id = %self.game.id, "match session closed");
        self.game
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn controller(&self) -> &ControllerState {
        &self.controller
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn current_point(&self) -> Option<&Point> {
        self.game.current_point()
    }

    pub fn current_possession(&self) -> Option<&Possession> {
        self.current_point().and_then(Point::current_possession)
    }

    pub fn score(&self) -> Score {
        self.game.score
    }

    pub fn point_in_progress(&self) -> bool {
        self.game.point_in_progress()
    }

    pub fn permissions(&self) -> Permissions {
        self.controller
            .permissions(&self.device.id, self.point_in_progress())
    }

    /// This device pushes match history instead of pulling it.
    pub fn is_history_source(&self) -> bool {
        self.permissions().play_by_play
    }

    pub fn next_starting_position(&self) -> Side {
        self.game.next_starting_position()
    }

    pub fn point_elapsed(&self) -> Duration {
        let now = self.now();
        self.current_point()
            .map(|point| point.elapsed(now))
            .unwrap_or_else(Duration::zero)
    }

    pub fn game_elapsed(&self) -> Duration {
        let Some(started) = self.game.game_start_timestamp else {
            return Duration::zero();
        };
        let until = self.game.game_end_timestamp.unwrap_or_else(|| self.now());
        (until - started).max(Duration::zero())
    }

    /// Clock values for display.
    pub fn clock_notice(&self) -> Notice {
        Notice::Clock {
            point_elapsed: self.point_elapsed(),
            game_elapsed: self.game_elapsed(),
            paused: self
                .current_point()
                .map(Point::is_paused)
                .unwrap_or(false),
        }
    }

    /// Summaries of the current point's events, oldest first.
    pub fn event_feed(&self) -> Vec<String> {
        self.current_point()
            .map(|point| point.events().map(Event::summarize).collect())
            .unwrap_or_default()
    }

    /// Confirm the line and start the next point.
    ///
    /// `players` defaults to the line proposed for the point, `side` to the
    /// computed starting position. Returns the point index.
    pub fn start_point(
        &mut self,
        players: Option<BTreeSet<String>>,
        side: Option<Side>,
    ) -> MatchResult<usize> {
        self.authorize(Role::ActiveCoach)?;
        self.ensure_not_ended()?;
        let now = self.now();

        let status = self.game.current_point().map(Point::status);
        if status == Some(PointStatus::InProgress) {
            return Err(MatchError::PointInProgress);
        }
        let reuse = status == Some(PointStatus::NotStarted);
        let prepared = self.game.current_point().filter(|_| reuse);
        let resolved_side = side
            .or_else(|| prepared.map(|point| point.starting_position))
            .unwrap_or_else(|| self.game.next_starting_position());
        let players = match players {
            Some(players) => players,
            None => {
                let staged = self.game.pending_next_line.players_for(resolved_side);
                match prepared {
                    Some(point) if staged.is_empty() => point.players.clone(),
                    _ => staged.clone(),
                }
            }
        };
        if players.is_empty() {
            return Err(MatchError::EmptyLine);
        }
        for name in players.iter().filter(|name| !self.roster.contains(name)) {
            warn!(player = %name, "line includes a player missing from the roster");
        }

        if !reuse {
            self.game.prepare_next_point();
        }
        let index = self.game.points.len() - 1;
        let mode = self.mode;
        let point = &mut self.game.points[index];
        point.players = players;
        if let Some(side) = side {
            point.starting_position = side;
        }
        point.confirm(now)?;
        if mode == ScoringMode::Streamlined {
            point.start(now)?;
        }
        let starting_position = point.starting_position;
        if self.game.game_start_timestamp.is_none() {
            self.game.game_start_timestamp = Some(now);
        }

        info!(point = index, side = ?starting_position, "point started");
        self.notify(Notice::PointStarted { index });
        self.check_gender_ratio(index);
        self.commit();
        Ok(index)
    }

    /// Append an event to the current point. Returns the winner when the
    /// event ended the point.
    pub fn record(&mut self, event: Event) -> MatchResult<Option<Winner>> {
        self.authorize(Role::ActiveCoach)?;
        event.validate()?;
        self.ensure_not_ended()?;
        let index = self.confirmed_point_index()?;
        let now = self.now();

        let summary = event.summarize();
        let winner = event.point_winner();
        let starts_clock = event.starts_clock();
        let point = &mut self.game.points[index];
        if starts_clock {
            point.start(now)?;
        }
        point.append(event.clone())?;
        if starts_clock && self.game.game_start_timestamp.is_none() {
            self.game.game_start_timestamp = Some(now);
        }

        info!(point = index, kind = event.kind(), %summary, "event recorded");
        self.notify(Notice::EventRecorded { summary });
        if let Some(winner) = winner {
            self.finish_point(index, winner, Some(&event), now)?;
        }
        self.commit();
        Ok(winner)
    }

    pub fn record_throw(
        &mut self,
        thrower: impl Into<String>,
        receiver: impl Into<String>,
        flags: ThrowFlags,
    ) -> MatchResult<Option<Winner>> {
        self.record(Event::Throw {
            thrower: thrower.into(),
            receiver: receiver.into(),
            flags,
        })
    }

    pub fn record_turnover(
        &mut self,
        thrower: Option<String>,
        receiver: Option<String>,
        flags: TurnoverFlags,
    ) -> MatchResult<Option<Winner>> {
        self.record(Event::Turnover {
            thrower,
            receiver,
            flags,
        })
    }

    pub fn record_defense(
        &mut self,
        defender: Option<String>,
        flags: DefenseFlags,
    ) -> MatchResult<Option<Winner>> {
        self.record(Event::Defense { defender, flags })
    }

    /// Record our pull. The puller's gender is taken from the roster.
    pub fn record_pull(
        &mut self,
        puller: Option<String>,
        quality: PullQuality,
        flags: PullFlags,
    ) -> MatchResult<Option<Winner>> {
        let puller_gender = puller.as_deref().map(|name| self.roster.gender_of(name));
        self.record(Event::Pull {
            puller,
            puller_gender,
            quality,
            flags,
        })
    }

    pub fn record_violation(
        &mut self,
        thrower: Option<String>,
        receiver: Option<String>,
        flags: ViolationFlags,
    ) -> MatchResult<Option<Winner>> {
        self.record(Event::Violation {
            thrower,
            receiver,
            flags,
        })
    }

    pub fn record_other(&mut self, flags: OtherFlags) -> MatchResult<Option<Winner>> {
        self.record(Event::Other { flags })
    }

    /// Streamlined goal entry: a scoring throw from `assister` to `scorer`.
    pub fn team_scores(
        &mut self,
        scorer: impl Into<String>,
        assister: Option<String>,
    ) -> MatchResult<Option<Winner>> {
        let flags = ThrowFlags {
            score: true,
            ..Default::default()
        };
        let assister = assister.unwrap_or_else(|| "Unknown player".to_string());
        self.record_throw(assister, scorer, flags)
    }

    pub fn opponent_scores(&mut self) -> MatchResult<()> {
        self.authorize(Role::ActiveCoach)?;
        self.ensure_not_ended()?;
        let index = self.confirmed_point_index()?;
        let now = self.now();
        self.finish_point(index, Winner::Opponent, None, now)?;
        self.commit();
        Ok(())
    }

    /// Remove the last event of the current point.
    pub fn undo(&mut self) -> MatchResult<Event> {
        self.authorize(Role::ActiveCoach)?;
        let index = self.open_point_index()?;
        let event = self.game.points[index].undo_last()?;
        let summary = event.summarize();
        info!(point = index, %summary, "event undone");
        self.notify(Notice::EventUndone { summary });
        self.commit();
        Ok(event)
    }

    /// Stop the point clock. Returns `false` when it was already stopped.
    pub fn pause(&mut self) -> MatchResult<bool> {
        self.authorize(Role::ActiveCoach)?;
        let index = self.open_point_index()?;
        let now = self.now();
        let changed = self.game.points[index].pause(now)?;
        if changed {
            debug!(point = index, "point paused");
            self.commit();
        }
        Ok(changed)
    }

    /// Restart the point clock. Returns `false` when it was already running.
    pub fn resume(&mut self) -> MatchResult<bool> {
        self.authorize(Role::ActiveCoach)?;
        let index = self.open_point_index()?;
        let now = self.now();
        let changed = self.game.points[index].resume(now)?;
        if changed {
            debug!(point = index, "point resumed");
            self.commit();
        }
        Ok(changed)
    }

    pub fn end_game(&mut self) -> MatchResult<()> {
        self.authorize(Role::ActiveCoach)?;
        self.ensure_not_ended()?;
        if self.point_in_progress() {
            return Err(MatchError::PointInProgress);
        }
        let now = self.now();
        self.game.game_end_timestamp = Some(now);
        info!(game_id = %self.game.id, score = ?self.game.score, "game ended");
        self.commit();
        Ok(())
    }

    /// Stage a line for an upcoming point.
    pub fn set_next_line(&mut self, line: LineType, players: BTreeSet<String>) -> MatchResult<()> {
        self.authorize(Role::LineCoach)?;
        let now = self.now();
        self.game.pending_next_line.set_line(line, players, now);
        self.line_conflicts.record_local_edit(line, now);
        self.next_line_dirty = true;
        debug!(line = line.label(), "next line edited");
        self.commit();
        Ok(())
    }

    pub fn set_active_line_type(&mut self, line: LineType) -> MatchResult<()> {
        self.authorize(Role::LineCoach)?;
        self.game.pending_next_line.active_type = line;
        self.next_line_dirty = true;
        self.commit();
        Ok(())
    }

    /// Replace the local view of the role holders.
    pub fn apply_controller_state(&mut self, state: ControllerState) {
        if state.same_roles(&self.controller) {
            self.controller = state;
            return;
        }
        let new_request = state
            .handoff_for(&self.device.id)
            .filter(|request| {
                self.controller
                    .pending_handoff
                    .as_ref()
                    .map(|previous| previous.id != request.id)
                    .unwrap_or(true)
            })
            .cloned();
        self.controller = state;
        if let Some(request) = new_request {
            info!(role = request.role.label(), from = %request.requester_name, "handoff requested from this device");
            self.notify(Notice::HandoffRequested { request });
        }
        self.notify(Notice::RolesChanged {
            state: self.controller.clone(),
        });
    }

    /// Replace the match history with a stored version. The staged next
    /// line is kept.
    pub fn restore(&mut self, mut game: Game) -> MatchResult<()> {
        self.authorize(Role::ActiveCoach)?;
        if self.point_in_progress() {
            return Err(MatchError::PointInProgress);
        }
        game.pending_next_line = mem::take(&mut self.game.pending_next_line);
        self.game = game;
        info!(points = self.game.points.len(), "match history restored");
        self.notify(Notice::GameReplaced);
        self.commit();
        Ok(())
    }

    /// Adopt pulled match history. The staged next line is kept since it
    /// synchronizes on its own. Returns `false` when nothing changed or this
    /// device is the history source.
    pub fn apply_remote_game(&mut self, mut remote: Game) -> bool {
        if self.is_history_source() {
            debug!("ignoring pulled history; this device is the source");
            return false;
        }
        remote.pending_next_line = mem::take(&mut self.game.pending_next_line);
        if remote == self.game {
            self.game.pending_next_line = remote.pending_next_line;
            return false;
        }
        self.game = remote;
        info!(points = self.game.points.len(), "match history replaced from remote");
        self.notify(Notice::GameReplaced);
        self.commit();
        true
    }

    /// Merge a pulled next line, warning once per point transition when
    /// another device edited a line this device is also editing.
    pub fn apply_remote_next_line(&mut self, remote: &NextLineBuffer) -> Vec<LineType> {
        let now = self.now();
        let transition = self.game.points.len();
        if let Some((line, remote_modified_at)) =
            self.line_conflicts.check(remote, now, transition)
        {
            warn!(line = line.label(), "concurrent edit of the next line");
            self.notify(Notice::LineConflict {
                line,
                remote_modified_at,
            });
        }
        let adopted = self.game.pending_next_line.merge_newer(remote);
        if !adopted.is_empty() {
            debug!(lines = adopted.len(), "next line merged from remote");
            self.commit();
        }
        adopted
    }

    /// Staged line to push, if local edits are waiting.
    pub fn take_next_line_push(&mut self) -> Option<NextLineBuffer> {
        if !self.next_line_dirty {
            return None;
        }
        self.next_line_dirty = false;
        Some(self.game.pending_next_line.clone())
    }

    /// Put local line edits back in line after a failed push.
    pub fn mark_next_line_dirty(&mut self) {
        self.next_line_dirty = true;
    }

    fn finish_point(
        &mut self,
        index: usize,
        winner: Winner,
        scoring_event: Option<&Event>,
        now: DateTime<Utc>,
    ) -> MatchResult<()> {
        let duration = self.game.points[index].complete(winner, now)?;
        self.game.score.record(winner);
        if let Some(event) = scoring_event {
            self.attribute(event);
        }
        for name in &self.game.points[index].players {
            match self.roster.get_mut(name) {
                Some(player) => {
                    player.points_played += 1;
                    player.time_played = player.time_played + duration;
                }
                None => debug!(player = %name, "no roster entry for time played"),
            }
        }

        let score = self.game.score;
        info!(point = index, ?winner, team = score.team, opponent = score.opponent, "point completed");
        self.notify(Notice::PointCompleted { winner, score });

        self.game.prepare_next_point();
        Ok(())
    }

    fn attribute(&mut self, event: &Event) {
        match event {
            Event::Throw {
                thrower,
                receiver,
                flags,
            } if flags.score => {
                self.credit(receiver, |player| player.goals += 1);
                self.credit(thrower, |player| player.assists += 1);
            }
            Event::Defense {
                defender: Some(defender),
                flags,
            } if flags.callahan => {
                self.credit(defender, |player| player.goals += 1);
            }
            _ => {}
        }
    }

    fn credit(&mut self, name: &str, apply: impl FnOnce(&mut crate::models::Player)) {
        match self.roster.get_mut(name) {
            Some(player) => apply(player),
            None => warn!(player = %name, "scoring player missing from roster"),
        }
    }

    fn check_gender_ratio(&self, index: usize) {
        let Some(point) = self.game.points.get(index) else {
            return;
        };
        let genders = point
            .players
            .iter()
            .map(|name| self.roster.gender_of(name));
        if let RatioCheck::Mismatch {
            required,
            actual,
            unknown,
        } = self.game.gender_ratio_config.check(index, genders)
        {
            warn!(point = index, ?required, ?actual, unknown, "line does not match gender ratio");
            self.notify(Notice::GenderRatio {
                point_index: index,
                required,
                actual,
                unknown,
            });
        }
    }

    fn open_point_index(&self) -> MatchResult<usize> {
        match self.game.current_point() {
            Some(point) if !point.is_completed() => Ok(self.game.points.len() - 1),
            _ => Err(MatchError::NoActivePoint),
        }
    }

    /// Open point whose line was confirmed through [`Self::start_point`].
    fn confirmed_point_index(&self) -> MatchResult<usize> {
        let index = self.open_point_index()?;
        if !self.game.points[index].is_confirmed() {
            debug!(point = index, "line not confirmed yet");
            return Err(MatchError::NoActivePoint);
        }
        Ok(index)
    }

    fn ensure_not_ended(&self) -> MatchResult<()> {
        if self.game.is_ended() {
            return Err(MatchError::GameEnded);
        }
        Ok(())
    }

    fn authorize(&self, role: Role) -> MatchResult<()> {
        let permissions = self.permissions();
        let allowed = match role {
            Role::ActiveCoach => permissions.play_by_play,
            Role::LineCoach => permissions.next_line,
        };
        if allowed {
            return Ok(());
        }
        let holder = self
            .controller
            .holder(role)
            .map(|holder| holder.display_name.clone());
        info!(role = role.label(), holder = holder.as_deref().unwrap_or("-"), "action refused");
        self.notify(Notice::PermissionDenied {
            role,
            holder: holder.clone(),
        });
        Err(MatchError::PermissionDenied { role, holder })
    }

    /// Route a notice to the attached notifier.
    pub fn notify(&self, notice: Notice) {
        match &self.notifier {
            Some(notifier) => notifier.notify(&notice),
            None => debug!(?notice, "no notifier attached"),
        }
    }

    fn commit(&self) {
        match &self.persistence {
            Some(persistence) => persistence.commit(&self.game),
            None => debug!("no persistence attached; commit skipped"),
        }
    }
}
