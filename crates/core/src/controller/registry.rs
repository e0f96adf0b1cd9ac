use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    ClaimOutcome, ControllerError, ControllerManager, ControllerPolicy, ControllerState,
    HandoffRequest, HandoffResolution, Role,
};

/// Thread-safe controller state for every live match, keyed by game id.
///
/// State is held in memory only; a restarted service starts with every role
/// vacant and holders reclaim on their next ping.
#[derive(Clone)]
pub struct ControllerRegistry {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    policy: ControllerPolicy,
    games: HashMap<String, ControllerManager>,
}

impl ControllerRegistry {
    pub fn new(policy: ControllerPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                policy,
                games: HashMap::new(),
            })),
        }
    }

    fn with_game<T>(&self, game_id: &str, f: impl FnOnce(&mut ControllerManager) -> T) -> T {
        let mut inner = self.inner.lock();
        let policy = inner.policy;
        let manager = inner
            .games
            .entry(game_id.to_string())
            .or_insert_with(|| ControllerManager::new(policy));
        f(manager)
    }

    /// Run `f` on a game that already has a manager. Unknown ids are not
    /// inserted.
    fn with_known_game<T>(
        &self,
        game_id: &str,
        f: impl FnOnce(&mut ControllerManager) -> T,
    ) -> Option<T> {
        self.inner.lock().games.get_mut(game_id).map(f)
    }

    pub fn state(&self, game_id: &str, now: DateTime<Utc>) -> ControllerState {
        self.with_known_game(game_id, |manager| manager.state(now))
            .unwrap_or_default()
    }

    pub fn claim(
        &self,
        game_id: &str,
        role: Role,
        user_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ControllerError> {
        self.with_game(game_id, |manager| {
            manager.claim(role, user_id, display_name, now)
        })
    }

    pub fn request_handoff(
        &self,
        game_id: &str,
        role: Role,
        requester_id: &str,
        requester_name: &str,
        now: DateTime<Utc>,
    ) -> Result<HandoffRequest, ControllerError> {
        self.with_known_game(game_id, |manager| {
            manager.request_handoff(role, requester_id, requester_name, now)
        })
        .unwrap_or(Err(ControllerError::RoleVacant))
    }

    pub fn respond_to_handoff(
        &self,
        game_id: &str,
        request_id: u64,
        user_id: &str,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<HandoffResolution, ControllerError> {
        self.with_known_game(game_id, |manager| {
            manager.respond_to_handoff(request_id, user_id, accept, now)
        })
        .unwrap_or(Err(ControllerError::NoPendingHandoff))
    }

    pub fn release(&self, game_id: &str, role: Role, user_id: &str) -> Result<(), ControllerError> {
        self.with_known_game(game_id, |manager| manager.release(role, user_id))
            .unwrap_or(Err(ControllerError::NotHolder))
    }

    pub fn ping(
        &self,
        game_id: &str,
        role: Role,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        self.with_known_game(game_id, |manager| manager.ping(role, user_id, now))
            .unwrap_or(Err(ControllerError::NotHolder))
    }

    /// Forget a finished match.
    pub fn clear_game(&self, game_id: &str) {
        self.inner.lock().games.remove(game_id);
    }

    /// Snapshot of every match with controller state.
    pub fn active_games(&self, now: DateTime<Utc>) -> HashMap<String, ControllerState> {
        let mut inner = self.inner.lock();
        inner
            .games
            .iter_mut()
            .map(|(game_id, manager)| (game_id.clone(), manager.state(now)))
            .collect()
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new(ControllerPolicy::default())
    }
}
