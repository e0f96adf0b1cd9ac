use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::transport::{PushReceipt, SyncTransport};
use crate::{
    controller::{
        ClaimOutcome, ControllerPolicy, ControllerRegistry, ControllerState, HandoffRequest,
        HandoffResolution, Role,
    },
    error::SyncError,
    models::{Game, NextLineBuffer},
    session::{Clock, DeviceIdentity, SystemClock},
    store::version_stamp,
};

#[derive(Debug, Clone)]
struct StoredVersion {
    version: String,
    saved_at: DateTime<Utc>,
    game: Game,
}

#[derive(Default)]
struct Inner {
    games: HashMap<String, Vec<StoredVersion>>,
    next_lines: HashMap<String, NextLineBuffer>,
}

/// In-process sync service shared by several sessions.
///
/// Behaves like the HTTP service: versioned full-state pushes, a per-match
/// next-line record and controller state kept by a [`ControllerRegistry`].
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<RwLock<Inner>>,
    controllers: ControllerRegistry,
    clock: Arc<dyn Clock>,
    offline: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), ControllerPolicy::default())
    }

    pub fn with_clock(clock: Arc<dyn Clock>, policy: ControllerPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            controllers: ControllerRegistry::new(policy),
            clock,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate losing the connection. Every call fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    /// Stored versions of a match, most recent first.
    pub fn versions(&self, game_id: &str) -> Vec<(String, DateTime<Utc>)> {
        let inner = self.inner.read();
        inner
            .games
            .get(game_id)
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .map(|stored| (stored.version.clone(), stored.saved_at))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn version(&self, game_id: &str, version: &str) -> Option<Game> {
        self.inner
            .read()
            .games
            .get(game_id)?
            .iter()
            .find(|stored| stored.version == version)
            .map(|stored| stored.game.clone())
    }

    /// Re-publish an older version as the latest.
    pub fn restore(&self, game_id: &str, version: &str) -> Option<PushReceipt> {
        let game = self.version(game_id, version)?;
        Some(self.store(game))
    }

    /// Forget a match and its controller state.
    pub fn delete(&self, game_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            inner.next_lines.remove(game_id);
            inner.games.remove(game_id).is_some()
        };
        self.controllers.clear_game(game_id);
        removed
    }

    pub fn game_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().games.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn store(&self, game: Game) -> PushReceipt {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let line = inner.next_lines.entry(game.id.clone()).or_default();
        line.merge_newer(&game.pending_next_line);

        let versions = inner.games.entry(game.id.clone()).or_default();
        let version = version_stamp(now, |stamp| {
            versions.iter().any(|stored| stored.version == stamp)
        });
        let game_id = game.id.clone();
        versions.push(StoredVersion {
            version: version.clone(),
            saved_at: now,
            game,
        });
        debug!(%game_id, %version, "stored pushed game");
        PushReceipt {
            status: "synced".to_string(),
            game_id,
            version,
            timestamp: now,
        }
    }

    fn ensure_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn push_game(&self, game: &Game) -> Result<PushReceipt, SyncError> {
        self.ensure_online()?;
        Ok(self.store(game.clone()))
    }

    async fn pull_game(&self, game_id: &str) -> Result<Option<Game>, SyncError> {
        self.ensure_online()?;
        let inner = self.inner.read();
        Ok(inner
            .games
            .get(game_id)
            .and_then(|versions| versions.last())
            .map(|stored| stored.game.clone()))
    }

    async fn pull_next_line(&self, game_id: &str) -> Result<Option<NextLineBuffer>, SyncError> {
        self.ensure_online()?;
        Ok(self.inner.read().next_lines.get(game_id).cloned())
    }

    async fn push_next_line(&self, game_id: &str, line: &NextLineBuffer) -> Result<(), SyncError> {
        self.ensure_online()?;
        self.inner
            .write()
            .next_lines
            .insert(game_id.to_string(), line.clone());
        Ok(())
    }

    async fn controller_state(&self, game_id: &str) -> Result<ControllerState, SyncError> {
        self.ensure_online()?;
        Ok(self.controllers.state(game_id, self.clock.now()))
    }

    async fn claim(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<ClaimOutcome, SyncError> {
        self.ensure_online()?;
        Ok(self
            .controllers
            .claim(game_id, role, &device.id, &device.display_name, self.clock.now())?)
    }

    async fn request_handoff(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<HandoffRequest, SyncError> {
        self.ensure_online()?;
        Ok(self.controllers.request_handoff(
            game_id,
            role,
            &device.id,
            &device.display_name,
            self.clock.now(),
        )?)
    }

    async fn respond_to_handoff(
        &self,
        game_id: &str,
        request_id: u64,
        device: &DeviceIdentity,
        accept: bool,
    ) -> Result<HandoffResolution, SyncError> {
        self.ensure_online()?;
        Ok(self.controllers.respond_to_handoff(
            game_id,
            request_id,
            &device.id,
            accept,
            self.clock.now(),
        )?)
    }

    async fn release(
        &self,
        game_id: &str,
        role: Role,
        device: &DeviceIdentity,
    ) -> Result<(), SyncError> {
        self.ensure_online()?;
        Ok(self.controllers.release(game_id, role, &device.id)?)
    }

    async fn ping(&self, game_id: &str, role: Role, device: &DeviceIdentity) -> Result<(), SyncError> {
        self.ensure_online()?;
        Ok(self
            .controllers
            .ping(game_id, role, &device.id, self.clock.now())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controller::ControllerError,
        models::{LineType, Side, Winner},
        session::ManualClock,
    };
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn transport() -> (MemoryTransport, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let transport = MemoryTransport::with_clock(clock.clone(), ControllerPolicy::default());
        (transport, clock)
    }

    #[tokio::test]
    async fn pushes_are_versioned_and_restorable() {
        let (transport, clock) = transport();
        let mut game = Game::new("g1", "Us", "Them", Side::Offense);
        let first = transport.push_game(&game).await.unwrap();
        assert_eq!(first.status, "synced");

        clock.advance(Duration::seconds(1));
        game.score.record(Winner::Team);
        transport.push_game(&game).await.unwrap();

        assert_eq!(transport.versions("g1").len(), 2);
        assert_eq!(transport.pull_game("g1").await.unwrap().unwrap().score.team, 1);

        transport.restore("g1", &first.version).unwrap();
        assert_eq!(transport.pull_game("g1").await.unwrap().unwrap().score.team, 0);
        assert!(transport.pull_game("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pushed_game_seeds_next_line() {
        let (transport, clock) = transport();
        let mut game = Game::new("g1", "Us", "Them", Side::Offense);
        game.pending_next_line
            .set_line(LineType::Offense, BTreeSet::from(["P1".to_string()]), clock.now());
        transport.push_game(&game).await.unwrap();

        let line = transport.pull_next_line("g1").await.unwrap().unwrap();
        assert!(line.o_line.contains("P1"));
    }

    #[tokio::test]
    async fn controller_conflicts_surface_as_errors() {
        let (transport, _) = transport();
        let phone = DeviceIdentity::new("phone", "Phone");
        let tablet = DeviceIdentity::new("tablet", "Tablet");
        transport.claim("g1", Role::ActiveCoach, &phone).await.unwrap();

        let err = transport
            .claim("g1", Role::ActiveCoach, &tablet)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Controller(ControllerError::Occupied { .. })
        ));
    }

    #[tokio::test]
    async fn offline_transport_fails_every_call() {
        let (transport, _) = transport();
        transport.set_offline(true);
        assert!(matches!(
            transport.pull_game("g1").await,
            Err(SyncError::Unavailable(_))
        ));
        transport.set_offline(false);
        assert!(transport.pull_game("g1").await.is_ok());
    }

    #[tokio::test]
    async fn delete_forgets_everything() {
        let (transport, _) = transport();
        let phone = DeviceIdentity::new("phone", "Phone");
        transport
            .push_game(&Game::new("g1", "Us", "Them", Side::Offense))
            .await
            .unwrap();
        transport.claim("g1", Role::LineCoach, &phone).await.unwrap();

        assert!(transport.delete("g1"));
        assert!(transport.game_ids().is_empty());
        assert!(transport.controller_state("g1").await.unwrap().is_local_mode());
    }
}
