use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    outbox::Outbox,
    transport::{PushReceipt, SyncTransport},
};
use crate::{
    controller::{ClaimOutcome, ControllerState, HandoffRequest, HandoffResolution, Role},
    error::SyncError,
    session::{MatchSession, Notice},
};

/// Outcome of one match-history round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameRound {
    Pushed(PushReceipt),
    /// Remote history was adopted.
    Pulled,
    Idle,
}

/// Drives the three synchronization rounds for one session.
///
/// The session lock is only taken between awaits.
pub struct SyncEngine {
    session: Arc<Mutex<MatchSession>>,
    transport: Arc<dyn SyncTransport>,
    outbox: Outbox,
    game_id: String,
}

impl SyncEngine {
    pub fn new(
        session: Arc<Mutex<MatchSession>>,
        transport: Arc<dyn SyncTransport>,
        outbox: Outbox,
    ) -> Self {
        let game_id = session.lock().game().id.clone();
        Self {
            session,
            transport,
            outbox,
            game_id,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Keep held roles alive, then adopt the service's view of them.
    pub async fn sync_controller(&self) -> Result<ControllerState, SyncError> {
        let (device, held) = {
            let session = self.session.lock();
            let device = session.device().clone();
            let held: Vec<Role> = [Role::ActiveCoach, Role::LineCoach]
                .into_iter()
                .filter(|role| session.controller().holds(*role, &device.id))
                .collect();
            (device, held)
        };
        for role in held {
            if let Err(err) = self.transport.ping(&self.game_id, role, &device).await {
                warn!(role = role.label(), "role ping failed: {err}");
            }
        }

        let state = self.transport.controller_state(&self.game_id).await?;
        self.session.lock().apply_controller_state(state.clone());
        Ok(state)
    }

    /// Push pending history when this device is its source, pull otherwise.
    pub async fn sync_game(&self) -> Result<GameRound, SyncError> {
        let is_source = self.session.lock().is_history_source();
        if is_source {
            return Ok(match self.push_pending().await? {
                Some(receipt) => GameRound::Pushed(receipt),
                None => GameRound::Idle,
            });
        }

        let remote = self.transport.pull_game(&self.game_id).await?;
        let adopted = match remote {
            Some(game) => self.session.lock().apply_remote_game(game),
            None => false,
        };
        Ok(if adopted { GameRound::Pulled } else { GameRound::Idle })
    }

    /// Push the outbox if its backoff allows. Failures are announced and
    /// scheduled for retry.
    pub async fn push_pending(&self) -> Result<Option<PushReceipt>, SyncError> {
        let now = self.session.lock().now();
        let Some(game) = self.outbox.due(now) else {
            return Ok(None);
        };

        match self.transport.push_game(&game).await {
            Ok(receipt) => {
                self.outbox.acknowledge(&game);
                debug!(version = %receipt.version, "match history pushed");
                Ok(Some(receipt))
            }
            Err(err) => {
                let (attempt, retry_at) = self.outbox.record_failure(now);
                warn!(attempt, %retry_at, "push failed: {err}");
                self.session.lock().notify(Notice::SyncFailed {
                    error: err.to_string(),
                    attempt,
                    retry_at: Some(retry_at),
                });
                Err(err)
            }
        }
    }

    /// Push local line edits, then merge the remote record.
    pub async fn sync_next_line(&self) -> Result<(), SyncError> {
        let outgoing = self.session.lock().take_next_line_push();
        if let Some(line) = outgoing {
            if let Err(err) = self.transport.push_next_line(&self.game_id, &line).await {
                self.session.lock().mark_next_line_dirty();
                return Err(err);
            }
        }

        let remote = self.transport.pull_next_line(&self.game_id).await?;
        if let Some(remote) = remote {
            self.session.lock().apply_remote_next_line(&remote);
        }
        Ok(())
    }

    pub async fn claim(&self, role: Role) -> Result<ClaimOutcome, SyncError> {
        let device = self.session.lock().device().clone();
        let outcome = self.transport.claim(&self.game_id, role, &device).await?;
        info!(role = role.label(), ?outcome, "role claimed");
        self.sync_controller().await?;
        Ok(outcome)
    }

    pub async fn request_handoff(&self, role: Role) -> Result<HandoffRequest, SyncError> {
        let device = self.session.lock().device().clone();
        let request = self
            .transport
            .request_handoff(&self.game_id, role, &device)
            .await?;
        info!(role = role.label(), request_id = request.id, "handoff requested");
        self.sync_controller().await?;
        Ok(request)
    }

    pub async fn respond_to_handoff(
        &self,
        request_id: u64,
        accept: bool,
    ) -> Result<HandoffResolution, SyncError> {
        let device = self.session.lock().device().clone();
        let resolution = self
            .transport
            .respond_to_handoff(&self.game_id, request_id, &device, accept)
            .await?;
        info!(request_id, ?resolution, "handoff answered");
        self.sync_controller().await?;
        Ok(resolution)
    }

    pub async fn release(&self, role: Role) -> Result<(), SyncError> {
        let device = self.session.lock().device().clone();
        self.transport.release(&self.game_id, role, &device).await?;
        info!(role = role.label(), "role released");
        self.sync_controller().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controller::ControllerPolicy,
        models::{Game, LineType, Roster, Side, ThrowFlags},
        session::{DeviceIdentity, ManualClock, Persistence},
        sync::MemoryTransport,
    };
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeSet;

    struct Device {
        session: Arc<Mutex<MatchSession>>,
        engine: SyncEngine,
    }

    fn device(
        id: &str,
        clock: &Arc<ManualClock>,
        transport: &MemoryTransport,
    ) -> Device {
        let outbox = Outbox::default();
        let session = MatchSession::new(
            Game::new("g1", "Us", "Them", Side::Offense),
            Roster::default(),
            DeviceIdentity::new(id, id),
        )
        .with_clock(clock.clone())
        .with_persistence(Arc::new(outbox.clone()) as Arc<dyn Persistence>);
        let session = Arc::new(Mutex::new(session));
        let engine = SyncEngine::new(session.clone(), Arc::new(transport.clone()), outbox);
        Device { session, engine }
    }

    fn setup() -> (Arc<ManualClock>, MemoryTransport) {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let transport = MemoryTransport::with_clock(clock.clone(), ControllerPolicy::default());
        (clock, transport)
    }

    fn line(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn source_pushes_and_follower_pulls() {
        let (clock, transport) = setup();
        let phone = device("phone", &clock, &transport);
        let tablet = device("tablet", &clock, &transport);

        phone.engine.claim(Role::ActiveCoach).await.unwrap();
        tablet.engine.sync_controller().await.unwrap();

        {
            let mut session = phone.session.lock();
            session.start_point(Some(line(&["P1", "P2"])), None).unwrap();
            session
                .record_throw("P1", "P2", ThrowFlags { score: true, ..Default::default() })
                .unwrap();
        }
        assert!(matches!(
            phone.engine.sync_game().await.unwrap(),
            GameRound::Pushed(_)
        ));
        assert_eq!(
            tablet.engine.sync_game().await.unwrap(),
            GameRound::Pulled
        );
        assert_eq!(tablet.session.lock().score().team, 1);
        assert_eq!(tablet.engine.sync_game().await.unwrap(), GameRound::Idle);
    }

    #[tokio::test]
    async fn failed_push_backs_off_and_recovers() {
        let (clock, transport) = setup();
        let phone = device("phone", &clock, &transport);
        phone
            .session
            .lock()
            .start_point(Some(line(&["P1"])), None)
            .unwrap();

        transport.set_offline(true);
        assert!(phone.engine.sync_game().await.is_err());
        assert_eq!(phone.engine.outbox().attempts(), 1);
        assert_eq!(phone.engine.sync_game().await.unwrap(), GameRound::Idle);

        transport.set_offline(false);
        clock.advance(Duration::seconds(1));
        assert!(matches!(
            phone.engine.sync_game().await.unwrap(),
            GameRound::Pushed(_)
        ));
        assert!(phone.engine.outbox().is_empty());
        assert_eq!(transport.versions("g1").len(), 1);
    }

    #[tokio::test]
    async fn line_edits_reach_other_devices() {
        let (clock, transport) = setup();
        let phone = device("phone", &clock, &transport);
        let tablet = device("tablet", &clock, &transport);

        tablet.engine.claim(Role::LineCoach).await.unwrap();
        tablet
            .session
            .lock()
            .set_next_line(LineType::Defense, line(&["P3", "P4"]))
            .unwrap();
        tablet.engine.sync_next_line().await.unwrap();

        phone.engine.sync_next_line().await.unwrap();
        assert!(phone
            .session
            .lock()
            .game()
            .pending_next_line
            .d_line
            .contains("P3"));
    }

    #[tokio::test]
    async fn handoff_round_trip_moves_the_role() {
        let (clock, transport) = setup();
        let phone = device("phone", &clock, &transport);
        let tablet = device("tablet", &clock, &transport);

        phone.engine.claim(Role::ActiveCoach).await.unwrap();
        let request = tablet.engine.request_handoff(Role::ActiveCoach).await.unwrap();

        phone.engine.sync_controller().await.unwrap();
        assert!(phone
            .session
            .lock()
            .controller()
            .handoff_for("phone")
            .is_some());

        let resolution = phone
            .engine
            .respond_to_handoff(request.id, true)
            .await
            .unwrap();
        assert_eq!(resolution, HandoffResolution::Accepted);

        tablet.engine.sync_controller().await.unwrap();
        assert!(tablet.session.lock().is_history_source());
        assert!(!phone.session.lock().is_history_source());
    }
}
