#![allow(missing_docs)]

//! Versioned on-disk snapshots of match state.
//!
//! Every save writes `<root>/<game>/versions/<stamp>.json` and refreshes
//! `<root>/<game>/current.json`. Versions are never rewritten.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    models::{Game, Score},
    session::Persistence,
};

/// Directory under the platform data dir used for snapshots.
pub const DEFAULT_STORE_DIR: &str = "ultistats/games";

const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3f";
const CURRENT_FILE: &str = "current.json";
const VERSIONS_DIR: &str = "versions";

static STAMP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}$").expect("valid stamp pattern")
});

/// Game ids are used verbatim as directory names.
static GAME_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid game id pattern"));

/// Version stamp for `at`, bumped a millisecond at a time until `taken`
/// reports it free.
pub fn version_stamp(mut at: DateTime<Utc>, taken: impl Fn(&str) -> bool) -> String {
    loop {
        let stamp = at.format(STAMP_FORMAT).to_string();
        if !taken(&stamp) {
            return stamp;
        }
        at = at + Duration::milliseconds(1);
    }
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    if !STAMP_PATTERN.is_match(stamp) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub game_id: String,
    pub version: String,
    pub saved_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Listing row for a stored match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: String,
    pub team: String,
    pub opponent: String,
    pub score: Score,
    pub updated_at: DateTime<Utc>,
    pub versions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    game_id: String,
    version: String,
    saved_at: DateTime<Utc>,
    game: Game,
}

/// Snapshot files for every match under one root.
pub struct SnapshotStore {
    root: PathBuf,
    failed: Mutex<Option<Game>>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            failed: Mutex::new(None),
        }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::config_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_STORE_DIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn game_dir(&self, game_id: &str) -> Result<PathBuf> {
        if !GAME_ID_PATTERN.is_match(game_id) {
            return Err(anyhow!(
                "invalid game id {game_id:?}: use letters, digits, '-' or '_'"
            ));
        }
        Ok(self.root.join(game_id))
    }

    fn versions_dir(&self, game_id: &str) -> Result<PathBuf> {
        Ok(self.game_dir(game_id)?.join(VERSIONS_DIR))
    }

    /// Store `game` as a new version stamped now.
    pub fn save(&self, game: &Game) -> Result<SnapshotEntry> {
        self.save_at(game, Utc::now())
    }

    pub fn save_at(&self, game: &Game, at: DateTime<Utc>) -> Result<SnapshotEntry> {
        let versions_dir = self.versions_dir(&game.id)?;
        fs::create_dir_all(&versions_dir)
            .with_context(|| format!("failed to create {}", versions_dir.display()))?;

        let version = version_stamp(at, |stamp| {
            versions_dir.join(format!("{stamp}.json")).exists()
        });
        let saved_at = parse_stamp(&version).unwrap_or(at);
        let snapshot = Snapshot {
            game_id: game.id.clone(),
            version: version.clone(),
            saved_at,
            game: game.clone(),
        };

        let path = versions_dir.join(format!("{version}.json"));
        write_snapshot(&path, &snapshot)?;
        write_snapshot(&self.game_dir(&game.id)?.join(CURRENT_FILE), &snapshot)?;
        debug!(game_id = %game.id, %version, "snapshot saved");

        Ok(SnapshotEntry {
            game_id: game.id.clone(),
            version,
            saved_at,
            path,
        })
    }

    /// Latest saved state, if any.
    pub fn current(&self, game_id: &str) -> Result<Option<Game>> {
        let path = self.game_dir(game_id)?.join(CURRENT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_snapshot(&path)?.game))
    }

    /// State as stored under `version`.
    pub fn version(&self, game_id: &str, version: &str) -> Result<Option<Game>> {
        if !STAMP_PATTERN.is_match(version) {
            return Err(anyhow!("invalid version stamp {version:?}"));
        }
        let path = self.versions_dir(game_id)?.join(format!("{version}.json"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_snapshot(&path)?.game))
    }

    /// Stored versions, most recent first.
    pub fn versions(&self, game_id: &str) -> Result<Vec<SnapshotEntry>> {
        let dir = self.versions_dir(game_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stamp) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match parse_stamp(stamp) {
                Some(saved_at) => entries.push(SnapshotEntry {
                    game_id: game_id.to_string(),
                    version: stamp.to_string(),
                    saved_at,
                    path: path.clone(),
                }),
                None => warn!(path = %path.display(), "ignoring file with unexpected name"),
            }
        }

        entries.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(entries)
    }

    /// Make an older version current again, recorded as a new version.
    pub fn restore(&self, game_id: &str, version: &str) -> Result<SnapshotEntry> {
        let game = self
            .version(game_id, version)?
            .ok_or_else(|| anyhow!("version {version} of {game_id} not found"))?;
        let entry = self.save(&game)?;
        info!(game_id, restored = version, version = %entry.version, "snapshot restored");
        Ok(entry)
    }

    /// Remove every stored version of a match. Returns `false` when nothing
    /// was stored.
    pub fn delete(&self, game_id: &str) -> Result<bool> {
        let dir = self.game_dir(game_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        info!(game_id, "snapshots deleted");
        Ok(true)
    }

    /// Every stored match, most recently updated first.
    pub fn list_games(&self) -> Result<Vec<GameSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("failed to walk {}", self.root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let current = entry.path().join(CURRENT_FILE);
            if !current.exists() {
                continue;
            }
            match read_snapshot(&current) {
                Ok(snapshot) => {
                    let versions = match self.versions(&snapshot.game_id) {
                        Ok(versions) => versions.len(),
                        Err(err) => {
                            warn!(path = %current.display(), "skipping stored match: {err:#}");
                            continue;
                        }
                    };
                    summaries.push(GameSummary {
                        game_id: snapshot.game_id,
                        team: snapshot.game.team,
                        opponent: snapshot.game.opponent,
                        score: snapshot.game.score,
                        updated_at: snapshot.saved_at,
                        versions,
                    });
                }
                Err(err) => warn!(path = %current.display(), "failed to read snapshot: {err:#}"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Retry a commit that failed to reach disk. Returns `true` when a
    /// pending state was written.
    pub fn flush(&self) -> Result<bool> {
        let Some(game) = self.failed.lock().take() else {
            return Ok(false);
        };
        if let Err(err) = self.save(&game) {
            let mut failed = self.failed.lock();
            if failed.is_none() {
                *failed = Some(game);
            }
            return Err(err);
        }
        Ok(true)
    }

    pub fn has_unsaved(&self) -> bool {
        self.failed.lock().is_some()
    }
}

impl Persistence for SnapshotStore {
    fn commit(&self, game: &Game) {
        match self.save(game) {
            Ok(_) => {
                self.failed.lock().take();
            }
            Err(err) => {
                warn!(game_id = %game.id, "failed to persist match: {err:#}");
                *self.failed.lock() = Some(game.clone());
            }
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let serialised = serde_json::to_vec_pretty(snapshot)?;
    fs::write(path, serialised).with_context(|| format!("failed to write {}", path.display()))
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Winner};
    use tempfile::tempdir;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    fn game(id: &str) -> Game {
        Game::new(id, "Us", "Them", Side::Offense)
    }

    #[test]
    fn saves_keep_every_version() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        let mut game = game("g1");

        let first = store.save_at(&game, at(0))?;
        game.score.record(Winner::Team);
        let second = store.save_at(&game, at(1_000))?;

        let versions = store.versions("g1")?;
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, second.version);
        assert_eq!(versions[1].version, first.version);

        assert_eq!(store.current("g1")?.unwrap().score.team, 1);
        assert_eq!(store.version("g1", &first.version)?.unwrap().score.team, 0);
        Ok(())
    }

    #[test]
    fn same_instant_saves_get_distinct_stamps() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        let a = store.save_at(&game("g1"), at(0))?;
        let b = store.save_at(&game("g1"), at(0))?;
        assert_ne!(a.version, b.version);
        assert_eq!(b.saved_at - a.saved_at, Duration::milliseconds(1));
        Ok(())
    }

    #[test]
    fn restore_appends_a_new_version() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        let mut game = game("g1");
        let original = store.save_at(&game, at(0))?;
        game.score.record(Winner::Opponent);
        store.save_at(&game, at(1_000))?;

        store.restore("g1", &original.version)?;
        assert_eq!(store.current("g1")?.unwrap().score.opponent, 0);
        assert_eq!(store.versions("g1")?.len(), 3);
        assert!(store.restore("g1", "2001-01-01T00-00-00-000").is_err());
        Ok(())
    }

    #[test]
    fn rejects_malformed_version_names() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        store.save_at(&game("g1"), at(0))?;
        assert!(store.version("g1", "../current").is_err());
        Ok(())
    }

    #[test]
    fn lists_and_deletes_games() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        store.save_at(&game("older"), at(0))?;
        store.save_at(&game("newer"), at(5_000))?;
        store.save_at(&game("newer"), at(6_000))?;

        let games = store.list_games()?;
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].game_id, "newer");
        assert_eq!(games[0].versions, 2);

        assert!(store.delete("older")?);
        assert!(!store.delete("older")?);
        assert_eq!(store.list_games()?.len(), 1);
        assert!(store.current("older")?.is_none());
        Ok(())
    }

    #[test]
    fn failed_commit_is_kept_for_flush() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x")?;
        let store = SnapshotStore::new(&blocker);

        store.commit(&game("g1"));
        assert!(store.has_unsaved());
        assert!(store.flush().is_err());
        assert!(store.has_unsaved());

        fs::remove_file(&blocker)?;
        assert!(store.flush()?);
        assert!(!store.has_unsaved());
        assert!(store.current("g1")?.is_some());
        Ok(())
    }

    #[test]
    fn game_ids_map_to_their_own_directory() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path());
        store.save_at(&game("g-1"), at(0))?;

        assert!(store.save_at(&game("g-1!"), at(1)).is_err());
        assert!(store.current("../g-1").is_err());
        assert!(store.versions("").is_err());
        assert!(store.delete("g 1").is_err());

        assert_eq!(store.versions("g-1")?.len(), 1);
        assert_eq!(store.current("g-1")?.map(|game| game.id), Some("g-1".to_string()));
        Ok(())
    }
}
