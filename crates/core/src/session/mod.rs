#![allow(missing_docs)]

//! Live match session and the loops that keep it in sync.

mod collaborators;
mod match_session;
pub mod runtime;

pub use collaborators::{Clock, CommitFanout, ManualClock, Notice, Notifier, Persistence, SystemClock};
pub use match_session::{DeviceIdentity, MatchSession, ScoringMode};
pub use runtime::{MatchRuntime, RuntimeSettings};
