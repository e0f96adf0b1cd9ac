use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{models::Game, session::Persistence};

/// Exponential backoff between failed pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "crate::models::duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "crate::models::duration_ms")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1i32 << exponent;
        (self.base_delay * factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(1),
            max_delay: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Default)]
struct OutboxState {
    pending: Option<Game>,
    attempts: u32,
    next_attempt: Option<DateTime<Utc>>,
}

/// Latest full state waiting to be pushed.
///
/// Only the newest commit is kept: a full-state push supersedes every
/// earlier one.
#[derive(Clone, Default)]
pub struct Outbox {
    state: Arc<Mutex<OutboxState>>,
    policy: RetryPolicy,
}

impl Outbox {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Arc::default(),
            policy,
        }
    }

    pub fn enqueue(&self, game: Game) {
        self.state.lock().pending = Some(game);
    }

    pub fn pending(&self) -> Option<Game> {
        self.state.lock().pending.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_none()
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Pending state if its backoff has elapsed.
    pub fn due(&self, now: DateTime<Utc>) -> Option<Game> {
        let state = self.state.lock();
        match state.next_attempt {
            Some(at) if at > now => {
                trace!(retry_at = %at, "push backing off");
                None
            }
            _ => state.pending.clone(),
        }
    }

    /// Mark `pushed` as delivered. A newer commit made during the push stays
    /// pending.
    pub fn acknowledge(&self, pushed: &Game) {
        let mut state = self.state.lock();
        if state.pending.as_ref() == Some(pushed) {
            state.pending = None;
        }
        state.attempts = 0;
        state.next_attempt = None;
    }

    /// Record a failed push. Returns the attempt count and when to retry.
    pub fn record_failure(&self, now: DateTime<Utc>) -> (u32, DateTime<Utc>) {
        let mut state = self.state.lock();
        state.attempts = state.attempts.saturating_add(1);
        let retry_at = now + self.policy.delay(state.attempts);
        state.next_attempt = Some(retry_at);
        (state.attempts, retry_at)
    }
}

impl Persistence for Outbox {
    fn commit(&self, game: &Game) {
        self.enqueue(game.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Winner};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::seconds(1),
            max_delay: Duration::seconds(10),
        };
        assert_eq!(policy.delay(1), Duration::seconds(1));
        assert_eq!(policy.delay(2), Duration::seconds(2));
        assert_eq!(policy.delay(4), Duration::seconds(8));
        assert_eq!(policy.delay(5), Duration::seconds(10));
        assert_eq!(policy.delay(40), Duration::seconds(10));
    }

    #[test]
    fn only_latest_commit_is_kept() {
        let outbox = Outbox::default();
        let mut game = Game::new("g1", "Us", "Them", Side::Offense);
        outbox.commit(&game);
        game.score.record(Winner::Team);
        outbox.commit(&game);
        assert_eq!(outbox.pending().unwrap().score.team, 1);
    }

    #[test]
    fn failures_back_off_until_acknowledged() {
        let outbox = Outbox::new(RetryPolicy::default());
        let game = Game::new("g1", "Us", "Them", Side::Offense);
        outbox.enqueue(game.clone());

        let (attempt, retry_at) = outbox.record_failure(at(0));
        assert_eq!(attempt, 1);
        assert_eq!(retry_at, at(1));
        assert!(outbox.due(at(0)).is_none());
        assert!(outbox.due(at(1)).is_some());

        outbox.acknowledge(&game);
        assert!(outbox.is_empty());
        assert_eq!(outbox.attempts(), 0);
    }

    #[test]
    fn newer_commit_survives_acknowledgement() {
        let outbox = Outbox::default();
        let mut game = Game::new("g1", "Us", "Them", Side::Offense);
        outbox.enqueue(game.clone());
        let pushed = outbox.due(at(0)).unwrap();

        game.score.record(Winner::Opponent);
        outbox.enqueue(game);
        outbox.acknowledge(&pushed);
        assert_eq!(outbox.pending().unwrap().score.opponent, 1);
    }
}
