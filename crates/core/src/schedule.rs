//! Cancellable periodic tasks.

use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, trace};

/// Handle owning one periodic loop. Dropping it stops the loop.
pub struct TaskHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to exit after its current iteration.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        let _ = (&mut self.join).await;
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

/// Run `task` every `period` until stopped.
///
/// `guard` is evaluated before each run; a tick is skipped when it returns
/// `false`, so a loop never acts on a context that is no longer relevant.
pub fn spawn_periodic<G, F, Fut>(
    name: &'static str,
    period: Duration,
    guard: G,
    mut task: F,
) -> TaskHandle
where
    G: Fn() -> bool + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop, mut stopped) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        loop {
            tokio::select! {
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !guard() {
                        trace!(task = name, "tick skipped; context no longer relevant");
                        continue;
                    }
                    task().await;
                }
            }
        }
        debug!(task = name, "periodic task stopped");
    });
    TaskHandle { name, stop, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn runs_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = spawn_periodic(
            "counter",
            Duration::from_secs(1),
            || true,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        time::sleep(Duration::from_millis(3500)).await;
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least three ticks, saw {seen}");

        handle.shutdown().await;
        let after_stop = count.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_skips_irrelevant_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let visible = Arc::new(AtomicBool::new(false));
        let counter = count.clone();
        let guard_flag = visible.clone();
        let handle = spawn_periodic(
            "guarded",
            Duration::from_secs(1),
            move || guard_flag.load(Ordering::SeqCst),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        visible.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_secs(2)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        handle.stop();
    }
}
