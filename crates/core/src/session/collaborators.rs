//! Narrow interfaces the session talks to.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    controller::{ControllerState, HandoffRequest, Role},
    models::{Game, LineType, RequiredCounts, Score, Winner},
};

/// Receives the full game after every successful mutation.
///
/// Fire-and-forget: implementations own their failure handling and retries.
pub trait Persistence: Send + Sync {
    fn commit(&self, game: &Game);
}

/// Hands every commit to several sinks in order.
#[derive(Clone, Default)]
pub struct CommitFanout {
    sinks: Vec<Arc<dyn Persistence>>,
}

impl CommitFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Persistence>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Persistence for CommitFanout {
    fn commit(&self, game: &Game) {
        for sink in &self.sinks {
            sink.commit(game);
        }
    }
}

/// Presentation hook for things a user should see.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Time source for every timestamp the session records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock advanced by hand, for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// User-facing notifications raised by the session and its loops.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Audit line for a recorded event.
    EventRecorded { summary: String },
    EventUndone { summary: String },
    PointStarted { index: usize },
    PointCompleted { winner: Winner, score: Score },
    /// A mutation was refused because another device holds the role.
    PermissionDenied {
        role: Role,
        holder: Option<String>,
    },
    /// Soft gender ratio warning for a line.
    GenderRatio {
        point_index: usize,
        required: RequiredCounts,
        actual: RequiredCounts,
        unknown: usize,
    },
    /// Another device edited the same staged line moments ago.
    LineConflict {
        line: LineType,
        remote_modified_at: DateTime<Utc>,
    },
    HandoffRequested { request: HandoffRequest },
    RolesChanged { state: ControllerState },
    /// Remote match history replaced the local copy.
    GameReplaced,
    SyncFailed {
        error: String,
        attempt: u32,
        retry_at: Option<DateTime<Utc>>,
    },
    /// Clock display refresh.
    Clock {
        #[serde(with = "crate::models::duration_ms")]
        point_elapsed: Duration,
        #[serde(with = "crate::models::duration_ms")]
        game_elapsed: Duration,
        paused: bool,
    },
}
