use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use ultistats_core::{
    controller::Role,
    models::{Side, Winner},
    session::{MatchRuntime, MatchSession, Notice, Notifier, RuntimeSettings},
    store::SnapshotStore,
    sync::SyncEngine,
};

use crate::commands::{self, Command, ParseError, HELP};

/// Forwards session notices to the input loop.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: &Notice) {
        let _ = self.sender.send(notice.clone());
    }
}

pub struct CliApp {
    session: Arc<Mutex<MatchSession>>,
    engine: Option<Arc<SyncEngine>>,
    store: Arc<SnapshotStore>,
    notices: mpsc::UnboundedReceiver<Notice>,
    settings: RuntimeSettings,
}

impl CliApp {
    pub fn new(
        session: Arc<Mutex<MatchSession>>,
        engine: Option<Arc<SyncEngine>>,
        store: Arc<SnapshotStore>,
        notices: mpsc::UnboundedReceiver<Notice>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            session,
            engine,
            store,
            notices,
            settings,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let runtime = MatchRuntime::start(self.session.clone(), self.engine.clone(), self.settings);
        {
            let session = self.session.lock();
            let game = session.game();
            println!(
                "{} vs {} ({} points recorded). Type `help` for commands.",
                game.team,
                game.opponent,
                game.points.iter().filter(|point| point.is_completed()).count()
            );
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("failed to read stdin")? {
                        Some(line) => {
                            if !self.handle_line(&line).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(notice) = self.notices.recv() => show_notice(&notice),
            }
        }

        runtime.stop_all().await;
        if let Some(engine) = self.engine.take() {
            if let Err(err) = engine.push_pending().await {
                warn!("final push failed: {err}");
            }
        }
        match Arc::try_unwrap(self.session) {
            Ok(session) => {
                session.into_inner().close();
            }
            Err(_) => warn!("session still shared at exit; skipping final commit"),
        }
        if let Err(err) = self.store.flush() {
            warn!("unsaved match state could not be written: {err:#}");
        }
        info!("bye");
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        match commands::parse(line) {
            Ok(Command::Quit) => false,
            Ok(command) => {
                if let Err(err) = self.execute(command).await {
                    println!("error: {err:#}");
                }
                true
            }
            Err(ParseError::Empty) => true,
            Err(err) => {
                println!("error: {err}");
                true
            }
        }
    }

    fn engine(&self) -> Result<&Arc<SyncEngine>> {
        self.engine
            .as_ref()
            .context("no sync server configured; roles are local")
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Start { side, players } => {
                let index = self.session.lock().start_point(players, side)?;
                let session = self.session.lock();
                if let Some(point) = session.current_point() {
                    println!(
                        "point {} on {} with {}",
                        index + 1,
                        side_label(point.starting_position),
                        point.players.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
            }
            Command::Throw {
                thrower,
                receiver,
                flags,
            } => {
                self.session.lock().record_throw(thrower, receiver, flags)?;
            }
            Command::Goal { scorer, assister } => {
                self.session.lock().team_scores(scorer, assister)?;
            }
            Command::TheyScore => self.session.lock().opponent_scores()?,
            Command::Turnover {
                thrower,
                receiver,
                flags,
            } => {
                self.session.lock().record_turnover(thrower, receiver, flags)?;
            }
            Command::Defense { defender, flags } => {
                self.session.lock().record_defense(defender, flags)?;
            }
            Command::Pull {
                puller,
                quality,
                flags,
            } => {
                self.session.lock().record_pull(puller, quality, flags)?;
            }
            Command::Violation {
                thrower,
                receiver,
                flags,
            } => {
                self.session.lock().record_violation(thrower, receiver, flags)?;
            }
            Command::Other(flags) => {
                self.session.lock().record_other(flags)?;
            }
            Command::Undo => {
                let event = self.session.lock().undo()?;
                println!("undone: {}", event.summarize());
            }
            Command::Pause => {
                if !self.session.lock().pause()? {
                    println!("clock already stopped");
                }
            }
            Command::Resume => {
                if !self.session.lock().resume()? {
                    println!("clock already running");
                }
            }
            Command::Line { line, players } => {
                let count = players.len();
                self.session.lock().set_next_line(line, players)?;
                println!("{} line staged ({count} players)", line.label());
            }
            Command::ActiveLine(line) => {
                self.session.lock().set_active_line_type(line)?;
                println!("using the {} line", line.label());
            }
            Command::Claim(role) => {
                let outcome = self.engine()?.claim(role).await?;
                println!("{} role: {outcome:?}", role.label());
            }
            Command::Release(role) => {
                self.engine()?.release(role).await?;
                println!("{} role released", role.label());
            }
            Command::Handoff(role) => {
                let request = self.engine()?.request_handoff(role).await?;
                println!(
                    "handoff #{} requested; approved automatically at {}",
                    request.id,
                    request.expires_at.format("%H:%M:%S")
                );
            }
            Command::Respond { request_id, accept } => {
                let resolution = self
                    .engine()?
                    .respond_to_handoff(request_id, accept)
                    .await?;
                println!("handoff #{request_id}: {resolution:?}");
            }
            Command::Feed => {
                let feed = self.session.lock().event_feed();
                if feed.is_empty() {
                    println!("no events this point");
                }
                for (index, line) in feed.iter().enumerate() {
                    println!("{:>3}. {line}", index + 1);
                }
            }
            Command::Status => self.print_status(),
            Command::Versions => {
                let game_id = self.session.lock().game().id.clone();
                for entry in self.store.versions(&game_id)?.iter().take(20) {
                    println!("{}  {}", entry.version, entry.saved_at.format("%Y-%m-%d %H:%M:%S"));
                }
            }
            Command::Restore(version) => {
                let game_id = self.session.lock().game().id.clone();
                let game = self
                    .store
                    .version(&game_id, &version)?
                    .with_context(|| format!("no version {version} for {game_id}"))?;
                self.session.lock().restore(game)?;
                println!("restored {version}");
            }
            Command::EndGame => {
                self.session.lock().end_game()?;
                println!("game over");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn print_status(&self) {
        let session = self.session.lock();
        let game = session.game();
        let score = session.score();
        println!(
            "{} {} - {} {}   game {}",
            game.team,
            score.team,
            score.opponent,
            game.opponent,
            clock(session.game_elapsed())
        );
        match session.current_point() {
            Some(point) => {
                let state = if point.is_completed() {
                    "completed"
                } else if point.is_paused() {
                    "paused"
                } else if session.point_in_progress() {
                    "in progress"
                } else {
                    "waiting to start"
                };
                let possession = session
                    .current_possession()
                    .map(|possession| side_label(possession.side()))
                    .unwrap_or("-");
                println!(
                    "point {} ({}) starting on {}, possession {}, clock {}",
                    game.points.len(),
                    state,
                    side_label(point.starting_position),
                    possession,
                    clock(session.point_elapsed())
                );
            }
            None => println!(
                "no points yet; first point on {}",
                side_label(session.next_starting_position())
            ),
        }

        let controller = session.controller();
        for role in [Role::ActiveCoach, Role::LineCoach] {
            let holder = controller
                .holder(role)
                .map(|holder| holder.display_name.as_str())
                .unwrap_or("open");
            println!("{:<13} {holder}", format!("{}:", role.label()));
        }
        let permissions = session.permissions();
        println!(
            "you may: {}{}",
            if permissions.play_by_play { "record " } else { "" },
            if permissions.next_line { "edit-lines" } else { "" }
        );
    }
}

fn show_notice(notice: &Notice) {
    match notice {
        Notice::EventRecorded { summary } => println!("  {summary}"),
        Notice::EventUndone { .. } | Notice::Clock { .. } | Notice::PointStarted { .. } => {}
        Notice::PointCompleted { winner, score } => {
            let who = match winner {
                Winner::Team => "we score",
                Winner::Opponent => "they score",
            };
            println!("  {who}: {} - {}", score.team, score.opponent);
        }
        Notice::PermissionDenied { role, holder } => println!(
            "  {} role is held by {}",
            role.label(),
            holder.as_deref().unwrap_or("another device")
        ),
        Notice::GenderRatio {
            point_index,
            required,
            actual,
            unknown,
        } => println!(
            "  ratio warning for point {}: need {} FMP / {} MMP, have {} / {} ({} unknown)",
            point_index + 1,
            required.fmp,
            required.mmp,
            actual.fmp,
            actual.mmp,
            unknown
        ),
        Notice::LineConflict { line, .. } => {
            println!("  another device just edited the {} line", line.label())
        }
        Notice::HandoffRequested { request } => println!(
            "  {} wants the {} role: `accept {}` or `deny {}`",
            request.requester_name,
            request.role.label(),
            request.id,
            request.id
        ),
        Notice::RolesChanged { .. } => println!("  roles updated"),
        Notice::GameReplaced => println!("  match updated from another device"),
        Notice::SyncFailed {
            error, attempt, ..
        } => println!("  sync failed (attempt {attempt}): {error}"),
    }
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::Offense => "offense",
        Side::Defense => "defense",
    }
}

fn clock(elapsed: Duration) -> String {
    let seconds = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats_minutes_and_seconds() {
        assert_eq!(clock(Duration::seconds(75)), "01:15");
        assert_eq!(clock(Duration::seconds(-3)), "00:00");
    }

    #[test]
    fn notifier_forwards_notices() {
        let (notifier, mut receiver) = ChannelNotifier::channel();
        notifier.notify(&Notice::GameReplaced);
        assert_eq!(receiver.try_recv().unwrap(), Notice::GameReplaced);
    }
}
