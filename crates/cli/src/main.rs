mod app;
mod commands;

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};
use ultistats_core::{
    config::{self, AppConfig},
    models::{Game, GenderRatio, GenderRatioConfig, Player, Roster, Side},
    session::{CommitFanout, MatchSession, ScoringMode},
    store::SnapshotStore,
    sync::{HttpTransport, Outbox, SyncEngine},
};
use uuid::Uuid;

use crate::app::{ChannelNotifier, CliApp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RatioMode {
    Off,
    Alternating,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Majority {
    Fmp,
    Mmp,
}

impl From<Majority> for GenderRatio {
    fn from(majority: Majority) -> Self {
        match majority {
            Majority::Fmp => GenderRatio::Fmp,
            Majority::Mmp => GenderRatio::Mmp,
        }
    }
}

/// Live play-by-play stat keeping for ultimate.
#[derive(Debug, Parser)]
#[command(name = "ultistats", version)]
struct Args {
    /// Our team name.
    #[arg(long, default_value = "Home")]
    team: String,
    /// Opponent name.
    #[arg(long, default_value = "Away")]
    opponent: String,
    /// Resume or join an existing match.
    #[arg(long)]
    game_id: Option<String>,
    /// JSON array of players.
    #[arg(long)]
    roster: Option<PathBuf>,
    /// Side we start the match on.
    #[arg(long, default_value = "offense", value_parser = parse_start_side)]
    start: Side,
    /// Sync service base URL; overrides the config file.
    #[arg(long, env = "ULTISTATS_SERVER")]
    server: Option<String>,
    /// Score only goals, without pulls and passes.
    #[arg(long)]
    streamlined: bool,
    /// Alternate config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "off")]
    ratio: RatioMode,
    /// Majority for the first point (alternating) or every point (fixed).
    #[arg(long, value_enum, default_value = "fmp")]
    majority: Majority,
    #[arg(long, default_value_t = 7)]
    players_on_field: usize,
}

fn parse_start_side(raw: &str) -> Result<Side, String> {
    commands::parse_side(raw).map_err(|err| err.to_string())
}

impl Args {
    fn ratio_config(&self) -> GenderRatioConfig {
        match self.ratio {
            RatioMode::Off => GenderRatioConfig::default(),
            RatioMode::Alternating => GenderRatioConfig::alternating(self.majority.into()),
            RatioMode::Fixed => GenderRatioConfig::fixed(self.majority.into(), self.players_on_field),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => {
            config::ensure_default_config()?;
            AppConfig::load()?
        }
    };
    if args.server.is_some() {
        config.sync.server_url = args.server.clone();
    }
    if args.streamlined {
        config.scoring_mode = ScoringMode::Streamlined;
    }

    let roster = match &args.roster {
        Some(path) => load_roster(path)?,
        None => Roster::default(),
    };
    let store = Arc::new(SnapshotStore::new(&config.data_root));
    let game = match &args.game_id {
        Some(id) => match store.current(id)? {
            Some(game) => {
                info!(game_id = %id, points = game.points.len(), "resuming stored match");
                game
            }
            None => new_game(id.clone(), &args),
        },
        None => new_game(Uuid::new_v4().to_string(), &args),
    };

    let outbox = Outbox::new(config.retry_policy());
    let persistence = CommitFanout::new()
        .with(store.clone())
        .with(Arc::new(outbox.clone()));
    let (notifier, notices) = ChannelNotifier::channel();
    let session = MatchSession::new(game, roster, config.device_identity())
        .with_mode(config.scoring_mode)
        .with_conflict_window(config.conflict_window())
        .with_persistence(Arc::new(persistence))
        .with_notifier(Arc::new(notifier));
    let session = Arc::new(Mutex::new(session));

    let engine = match &config.sync.server_url {
        Some(url) => {
            let transport = HttpTransport::new(url.as_str(), config.request_timeout())
                .with_context(|| format!("failed to build sync client for {url}"))?;
            info!(server = %url, "sync enabled");
            Some(Arc::new(SyncEngine::new(
                session.clone(),
                Arc::new(transport),
                outbox,
            )))
        }
        None => {
            info!("no sync server configured; running offline");
            None
        }
    };

    let app = CliApp::new(session, engine, store, notices, config.runtime_settings());
    app.run().await
}

fn new_game(id: String, args: &Args) -> Game {
    info!(game_id = %id, team = %args.team, opponent = %args.opponent, "starting a new match");
    Game::new(id, &args.team, &args.opponent, args.start).with_gender_ratio(args.ratio_config())
}

fn load_roster(path: &Path) -> Result<Roster> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read roster {}", path.display()))?;
    let players: Vec<Player> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse roster {}", path.display()))?;
    Ok(Roster::new(players))
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("ultistats.log");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_flags_build_config() {
        let args = Args::parse_from(["ultistats", "--ratio", "fixed", "--majority", "mmp", "--players-on-field", "5"]);
        let config = args.ratio_config();
        assert_eq!(config, GenderRatioConfig::fixed(GenderRatio::Mmp, 5));
        assert_eq!(args.start, Side::Offense);
    }

    #[test]
    fn start_side_accepts_short_forms() {
        let args = Args::parse_from(["ultistats", "--start", "d"]);
        assert_eq!(args.start, Side::Defense);
    }
}
