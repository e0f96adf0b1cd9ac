#![warn(clippy::all, missing_docs)]

//! Core match engine for live ultimate frisbee stat keeping.
//!
//! This crate hosts the match data model, the point and possession rules,
//! role-gated multi-device control, synchronization and the versioned
//! snapshot store used by the command line front end and any future ones.

pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod schedule;
pub mod session;
pub mod store;
pub mod sync;

pub use config::AppConfig;
pub use controller::{ControllerManager, ControllerRegistry, ControllerState, Role};
pub use error::{MatchError, MatchResult, SyncError};
pub use models::{Event, Game, Point, Roster, Side, Winner};
pub use session::{DeviceIdentity, MatchRuntime, MatchSession, Notice, ScoringMode};
pub use store::SnapshotStore;
pub use sync::{HttpTransport, MemoryTransport, SyncEngine, SyncTransport};
