//! Background loops attached to a live session.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::MatchSession;
use crate::{
    schedule::{spawn_periodic, TaskHandle},
    sync::SyncEngine,
};

/// Loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub clock_tick: Duration,
    pub game_sync_interval: Duration,
    pub next_line_interval: Duration,
    pub controller_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            clock_tick: Duration::from_secs(1),
            game_sync_interval: Duration::from_secs(2),
            next_line_interval: Duration::from_secs(1),
            controller_interval: Duration::from_secs(3),
        }
    }
}

/// Owns every periodic task of one session.
///
/// Loops only act while the session is marked relevant; dropping the runtime
/// or calling [`MatchRuntime::stop_all`] cancels them.
pub struct MatchRuntime {
    tasks: Vec<TaskHandle>,
    relevant: Arc<AtomicBool>,
}

impl MatchRuntime {
    pub fn start(
        session: Arc<Mutex<MatchSession>>,
        engine: Option<Arc<SyncEngine>>,
        settings: RuntimeSettings,
    ) -> Self {
        let relevant = Arc::new(AtomicBool::new(true));
        let mut tasks = Vec::new();

        let guard = relevant.clone();
        let running = session.clone();
        let ticking = session.clone();
        tasks.push(spawn_periodic(
            "clock",
            settings.clock_tick,
            move || guard.load(Ordering::SeqCst) && running.lock().point_in_progress(),
            move || {
                let session = ticking.lock();
                session.notify(session.clock_notice());
                std::future::ready(())
            },
        ));

        match engine {
            Some(engine) => {
                tasks.push(Self::sync_loop(
                    "game-sync",
                    settings.game_sync_interval,
                    &relevant,
                    &engine,
                    |engine| async move {
                        if let Err(err) = engine.sync_game().await {
                            debug!("game sync round failed: {err}");
                        }
                    },
                ));
                tasks.push(Self::sync_loop(
                    "next-line-sync",
                    settings.next_line_interval,
                    &relevant,
                    &engine,
                    |engine| async move {
                        if let Err(err) = engine.sync_next_line().await {
                            warn!("next line sync failed: {err}");
                        }
                    },
                ));
                tasks.push(Self::sync_loop(
                    "controller-sync",
                    settings.controller_interval,
                    &relevant,
                    &engine,
                    |engine| async move {
                        if let Err(err) = engine.sync_controller().await {
                            warn!("controller sync failed: {err}");
                        }
                    },
                ));
            }
            None => debug!("no sync engine attached; running offline"),
        }

        info!(tasks = tasks.len(), "match runtime started");
        Self { tasks, relevant }
    }

    fn sync_loop<F, Fut>(
        name: &'static str,
        period: Duration,
        relevant: &Arc<AtomicBool>,
        engine: &Arc<SyncEngine>,
        round: F,
    ) -> TaskHandle
    where
        F: Fn(Arc<SyncEngine>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let guard = relevant.clone();
        let engine = engine.clone();
        spawn_periodic(
            name,
            period,
            move || guard.load(Ordering::SeqCst),
            move || round(engine.clone()),
        )
    }

    /// Pause or resume every loop, e.g. when the match screen is hidden.
    pub fn set_relevant(&self, relevant: bool) {
        self.relevant.store(relevant, Ordering::SeqCst);
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant.load(Ordering::SeqCst)
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(TaskHandle::name).collect()
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn stop_all(self) {
        self.relevant.store(false, Ordering::SeqCst);
        for task in self.tasks {
            task.shutdown().await;
        }
        info!("match runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{Game, Roster, Side},
        session::{DeviceIdentity, ManualClock, Notice, Notifier, Persistence, ScoringMode},
        sync::{MemoryTransport, Outbox},
    };
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct ClockTicks(Mutex<usize>);

    impl Notifier for ClockTicks {
        fn notify(&self, notice: &Notice) {
            if matches!(notice, Notice::Clock { .. }) {
                *self.0.lock() += 1;
            }
        }
    }

    fn session(notifier: Arc<ClockTicks>, outbox: &Outbox) -> Arc<Mutex<MatchSession>> {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let session = MatchSession::new(
            Game::new("g1", "Us", "Them", Side::Offense),
            Roster::default(),
            DeviceIdentity::new("phone", "Phone"),
        )
        .with_clock(clock)
        .with_mode(ScoringMode::Streamlined)
        .with_notifier(notifier)
        .with_persistence(Arc::new(outbox.clone()) as Arc<dyn Persistence>);
        Arc::new(Mutex::new(session))
    }

    #[test]
    fn next_line_polls_faster_than_history() {
        let settings = RuntimeSettings::default();
        assert!(settings.next_line_interval < settings.game_sync_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_ticks_only_during_a_point() {
        let ticks = Arc::new(ClockTicks::default());
        let session = session(ticks.clone(), &Outbox::default());
        let runtime = MatchRuntime::start(session.clone(), None, RuntimeSettings::default());
        assert_eq!(runtime.task_names(), vec!["clock"]);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*ticks.0.lock(), 0);

        session
            .lock()
            .start_point(Some(BTreeSet::from(["P1".to_string()])), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(*ticks.0.lock() >= 2);

        runtime.set_relevant(false);
        let seen = *ticks.0.lock();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*ticks.0.lock(), seen);

        runtime.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sync_loops_push_committed_state() {
        let outbox = Outbox::default();
        let session = session(Arc::new(ClockTicks::default()), &outbox);
        let transport = MemoryTransport::new();
        let engine = Arc::new(SyncEngine::new(
            session.clone(),
            Arc::new(transport.clone()),
            outbox,
        ));
        let runtime = MatchRuntime::start(session.clone(), Some(engine), RuntimeSettings::default());
        assert_eq!(runtime.task_names().len(), 4);

        session
            .lock()
            .start_point(Some(BTreeSet::from(["P1".to_string()])), None)
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!transport.versions("g1").is_empty());

        runtime.stop_all().await;
    }
}
