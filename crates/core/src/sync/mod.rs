#![allow(missing_docs)]

//! Multi-device synchronization: transports, the push outbox and the
//! periodic rounds that keep a session current.

mod conflict;
mod engine;
mod memory;
mod outbox;
mod transport;

pub use conflict::LineConflictDetector;
pub use engine::{GameRound, SyncEngine};
pub use memory::MemoryTransport;
pub use outbox::{Outbox, RetryPolicy};
pub use transport::{ControllerRequest, HttpTransport, PushReceipt, SyncTransport};
