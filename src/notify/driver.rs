//! Decides when to sync: explicit triggers, foreground transitions, and a
//! periodic timer that only runs while the app is in the foreground.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use super::sync::{NotificationSync, SyncOutcome, SyncTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Foreground,
    Background,
}

/// Control surface for a running [`SyncDriver`] task.
pub struct DriverHandle {
    trigger_tx: mpsc::UnboundedSender<SyncTrigger>,
    lifecycle_tx: watch::Sender<Lifecycle>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Request a sync. Returns false once the driver has stopped.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.trigger_tx.send(trigger).is_ok()
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle_tx.send_if_modified(|current| {
            if *current == lifecycle {
                false
            } else {
                *current = lifecycle;
                true
            }
        });
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle_tx.borrow()
    }

    /// Stop the loop and wait for syncs it started to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            log::error!("Sync driver task failed: {}", e);
        }
    }
}

pub struct SyncDriver;

impl SyncDriver {
    pub fn spawn(
        engine: Arc<NotificationSync>,
        interval: Duration,
        initial: Lifecycle,
    ) -> DriverHandle {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = watch::channel(initial);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(engine, interval, trigger_rx, lifecycle_rx, stop_rx));

        DriverHandle {
            trigger_tx,
            lifecycle_tx,
            stop_tx,
            task,
        }
    }
}

async fn run_loop(
    engine: Arc<NotificationSync>,
    interval: Duration,
    mut trigger_rx: mpsc::UnboundedReceiver<SyncTrigger>,
    mut lifecycle_rx: watch::Receiver<Lifecycle>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut foreground = *lifecycle_rx.borrow_and_update() == Lifecycle::Foreground;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut running: JoinSet<()> = JoinSet::new();
    log::info!("Sync driver started (every {}s)", interval.as_secs());

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            changed = lifecycle_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_foreground = *lifecycle_rx.borrow_and_update() == Lifecycle::Foreground;
                if now_foreground && !foreground {
                    spawn_sync(&mut running, &engine, SyncTrigger::Foreground);
                    ticker.reset();
                }
                foreground = now_foreground;
                log::debug!("Lifecycle now {}", if foreground { "foreground" } else { "background" });
            }
            Some(trigger) = trigger_rx.recv() => {
                spawn_sync(&mut running, &engine, trigger);
            }
            _ = ticker.tick(), if foreground => {
                spawn_sync(&mut running, &engine, SyncTrigger::Periodic);
            }
            Some(done) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = done {
                    log::error!("Sync task panicked: {}", e);
                }
            }
        }
    }

    while running.join_next().await.is_some() {}
    log::info!("Sync driver stopped");
}

fn spawn_sync(running: &mut JoinSet<()>, engine: &Arc<NotificationSync>, trigger: SyncTrigger) {
    let engine = Arc::clone(engine);
    running.spawn(async move {
        match engine.sync(trigger).await {
            Ok(SyncOutcome::Completed(_)) => {}
            Ok(SyncOutcome::Skipped) => {
                log::debug!("{:?} sync collapsed into the one in flight", trigger)
            }
            Err(e) => log::warn!("{:?} sync failed: {}", trigger, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::sync::{SyncStateStore, SyncStatus};
    use crate::notify::testing::{MemoryScheduler, MockSource};

    const PERIOD: Duration = Duration::from_secs(60);

    fn setup(initial: Lifecycle) -> (Arc<MockSource>, Arc<NotificationSync>, DriverHandle) {
        let source = Arc::new(MockSource::default());
        let engine = Arc::new(NotificationSync::new(
            source.clone(),
            Arc::new(MemoryScheduler::default()),
            Arc::new(SyncStateStore::in_memory()),
        ));
        let handle = SyncDriver::spawn(engine.clone(), PERIOD, initial);
        (source, engine, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ticks_while_foreground() {
        let (source, _engine, handle) = setup(Lifecycle::Foreground);
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(source.calls(), 3);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_timer() {
        let (source, engine, handle) = setup(Lifecycle::Foreground);
        source.set_failing(true);
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(source.calls(), 2);
        assert!(matches!(engine.status(), SyncStatus::Error(_)));

        source.set_failing(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 3);
        assert!(matches!(engine.status(), SyncStatus::LastSynced(_)));
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn background_pauses_timer_and_foreground_resumes() {
        let (source, _engine, handle) = setup(Lifecycle::Background);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.calls(), 0);

        handle.set_lifecycle(Lifecycle::Foreground);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);

        // Timer restarts from the transition
        tokio::time::sleep(Duration::from_secs(58)).await;
        assert_eq!(source.calls(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 2);

        handle.set_lifecycle(Lifecycle::Background);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls(), 2);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_triggers_run_in_background() {
        let (source, _engine, handle) = setup(Lifecycle::Background);
        assert!(handle.trigger(SyncTrigger::AuthSuccess));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.trigger(SyncTrigger::Manual));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 2);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_foreground_signal_is_ignored() {
        let (source, _engine, handle) = setup(Lifecycle::Foreground);
        handle.set_lifecycle(Lifecycle::Foreground);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 0);
        assert_eq!(handle.lifecycle(), Lifecycle::Foreground);
        handle.stop().await;
    }
}
