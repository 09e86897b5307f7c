//! Keeps the locally scheduled reminders in step with the server.
//!
//! Every sync fetches the full upcoming set and diffs it against what the
//! scheduler holds; nothing is patched incrementally. Only one sync runs at a
//! time per engine, later callers get [`SyncOutcome::Skipped`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use super::scheduler::NotificationScheduler;
use crate::core::horizon::Horizon;
use crate::core::notification::{ScheduledNotificationInfo, ServerNotification};
use crate::error::Result;

/// Where upcoming reminders come from.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn fetch_notifications(&self, within_days: u32) -> Result<Vec<ServerNotification>>;
}

/// What asked for a sync. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    AuthSuccess,
    Foreground,
    Periodic,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error(String),
    LastSynced(DateTime<Utc>),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Error(e) => write!(f, "error: {}", e),
            Self::LastSynced(at) => write!(f, "last synced {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        }
    }
}

/// Result of one completed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub scheduled: usize,
    pub cancelled: usize,
    pub unchanged: usize,
    /// Server entries whose fire time had already passed.
    pub skipped_past: usize,
    pub dismissed: usize,
    /// Per-item scheduler failures; the rest of the sync still applied.
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Reminders armed once this sync finished.
    pub fn armed(&self) -> usize {
        self.unchanged + self.scheduled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another sync was already running.
    Skipped,
}

/// The changes needed to turn `current` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub cancel: Vec<String>,
    pub schedule: Vec<ScheduledNotificationInfo>,
    pub unchanged: usize,
    pub skipped_past: usize,
}

/// Diff the server's reminders against the scheduler's pending set.
///
/// Desired entries at or before `now` are ignored. A changed entry is both
/// cancelled and rescheduled.
pub fn plan_reconcile(
    desired: &[ScheduledNotificationInfo],
    current: &[ScheduledNotificationInfo],
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let mut wanted: BTreeMap<&str, &ScheduledNotificationInfo> = BTreeMap::new();
    for info in desired {
        if info.scheduled_time <= now {
            plan.skipped_past += 1;
            continue;
        }
        wanted.insert(info.identifier.as_str(), info);
    }

    let existing: HashMap<&str, &ScheduledNotificationInfo> = current
        .iter()
        .map(|info| (info.identifier.as_str(), info))
        .collect();

    for info in current {
        match wanted.get(info.identifier.as_str()) {
            Some(want) if want.same_content(info) => {}
            _ => plan.cancel.push(info.identifier.clone()),
        }
    }

    for (id, want) in wanted {
        match existing.get(id) {
            Some(have) if have.same_content(want) => plan.unchanged += 1,
            _ => plan.schedule.push(want.clone()),
        }
    }

    plan
}

/// Sync bookkeeping that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncState {
    pub horizon_days: Horizon,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_scheduled: usize,
}

/// [`SyncState`] behind a lock, written through to a JSON file.
#[derive(Debug)]
pub struct SyncStateStore {
    path: Option<PathBuf>,
    state: Mutex<SyncState>,
}

impl SyncStateStore {
    /// Load from `path`. A missing or unreadable file starts from defaults.
    pub fn load(path: &Path) -> Self {
        let state = match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("Ignoring corrupt sync state {}: {}", path.display(), e);
                    SyncState::default()
                })
            }
            Ok(_) => SyncState::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SyncState::default(),
            Err(e) => {
                log::warn!("Failed to read sync state {}: {}", path.display(), e);
                SyncState::default()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn snapshot(&self) -> SyncState {
        self.lock().clone()
    }

    pub fn horizon(&self) -> Horizon {
        self.snapshot().horizon_days
    }

    /// Validate and persist a new horizon. Memory is only changed once the
    /// file write succeeds.
    pub fn set_horizon(&self, days: f64) -> Result<Horizon> {
        let horizon = Horizon::new(days)?;
        let mut guard = self.lock();
        let mut next = guard.clone();
        next.horizon_days = horizon;
        self.write(&next)?;
        *guard = next;
        Ok(horizon)
    }

    pub fn record_success(&self, at: DateTime<Utc>, scheduled: usize) {
        let state = self.update(|s| {
            s.last_sync_at = Some(at);
            s.last_error = None;
            s.last_scheduled = scheduled;
        });
        self.persist(&state);
    }

    pub fn record_failure(&self, error: &str) {
        let state = self.update(|s| s.last_error = Some(error.to_string()));
        self.persist(&state);
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SyncState)) -> SyncState {
        let mut guard = self.lock();
        f(&mut guard);
        guard.clone()
    }

    fn write(&self, state: &SyncState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }

    fn persist(&self, state: &SyncState) {
        if let Err(e) = self.write(state) {
            log::error!("Failed to save sync state: {}", e);
        }
    }
}

/// Clears the in-flight flag however the sync future ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct NotificationSync {
    source: Arc<dyn NotificationSource>,
    scheduler: Arc<dyn NotificationScheduler>,
    state: Arc<SyncStateStore>,
    in_flight: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl NotificationSync {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        scheduler: Arc<dyn NotificationScheduler>,
        state: Arc<SyncStateStore>,
    ) -> Self {
        let snapshot = state.snapshot();
        let initial = match (snapshot.last_error, snapshot.last_sync_at) {
            (Some(e), _) => SyncStatus::Error(e),
            (None, Some(at)) => SyncStatus::LastSynced(at),
            (None, None) => SyncStatus::Idle,
        };
        let (status, _) = watch::channel(initial);
        Self {
            source,
            scheduler,
            state,
            in_flight: AtomicBool::new(false),
            status,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Follow status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn horizon(&self) -> Horizon {
        self.state.horizon()
    }

    /// Change the horizon. Takes effect on the next sync.
    pub fn set_horizon(&self, days: f64) -> Result<Horizon> {
        let horizon = self.state.set_horizon(days)?;
        log::info!("Notification horizon set to {}", horizon);
        Ok(horizon)
    }

    pub fn state(&self) -> &Arc<SyncStateStore> {
        &self.state
    }

    pub async fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            log::debug!("Sync already in flight, skipping {:?} trigger", trigger);
            return Ok(SyncOutcome::Skipped);
        };

        log::info!("Syncing notifications ({:?})", trigger);
        self.status.send_replace(SyncStatus::Syncing);

        match self.reconcile().await {
            Ok(report) => {
                let now = Utc::now();
                self.state.record_success(now, report.armed());
                self.status.send_replace(SyncStatus::LastSynced(now));
                log::info!(
                    "Sync complete: {} scheduled, {} cancelled, {} unchanged, {} dismissed",
                    report.scheduled,
                    report.cancelled,
                    report.unchanged,
                    report.dismissed
                );
                for e in &report.errors {
                    log::warn!("Sync item error: {}", e);
                }
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                let msg = e.to_string();
                log::error!("Notification sync failed: {}", msg);
                self.state.record_failure(&msg);
                self.status.send_replace(SyncStatus::Error(msg));
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<SyncReport> {
        let horizon = self.state.horizon();
        let server = self.source.fetch_notifications(horizon.days()).await?;
        let desired: Vec<ScheduledNotificationInfo> =
            server.iter().map(ServerNotification::to_scheduled).collect();
        let current = self.scheduler.scheduled().await?;
        let plan = plan_reconcile(&desired, &current, Utc::now());

        let mut report = SyncReport {
            fetched: server.len(),
            unchanged: plan.unchanged,
            skipped_past: plan.skipped_past,
            ..SyncReport::default()
        };

        let cancels = join_all(plan.cancel.iter().map(|id| self.scheduler.cancel(id))).await;
        for (id, result) in plan.cancel.iter().zip(cancels) {
            match result {
                Ok(()) => report.cancelled += 1,
                Err(e) => report.errors.push(format!("cancel {}: {}", id, e)),
            }
        }

        for info in plan.schedule {
            let id = info.identifier.clone();
            match self.scheduler.schedule(info).await {
                Ok(()) => report.scheduled += 1,
                Err(e) => report.errors.push(format!("schedule {}: {}", id, e)),
            }
        }

        let valid: HashSet<&str> = desired.iter().map(|d| d.identifier.as_str()).collect();
        match self.scheduler.presented().await {
            Ok(presented) => {
                for id in presented.iter().filter(|id| !valid.contains(id.as_str())) {
                    match self.scheduler.dismiss(id).await {
                        Ok(()) => report.dismissed += 1,
                        Err(e) => log::debug!("Failed to dismiss {}: {}", id, e),
                    }
                }
            }
            Err(e) => log::debug!("Could not list presented reminders: {}", e),
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::notify::testing::{MemoryScheduler, MockSource, server_notification};
    use chrono::Duration;
    use tokio::sync::Notify;

    fn engine(
        source: Arc<dyn NotificationSource>,
        scheduler: Arc<MemoryScheduler>,
    ) -> NotificationSync {
        NotificationSync::new(source, scheduler, Arc::new(SyncStateStore::in_memory()))
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::Skipped => panic!("sync was skipped"),
        }
    }

    fn info(id: &str, at: DateTime<Utc>) -> ScheduledNotificationInfo {
        server_notification(id, at).to_scheduled()
    }

    #[test]
    fn plan_ignores_past_and_detects_changes() {
        let now = Utc::now();
        let keep = info("keep", now + Duration::hours(1));
        let past = info("past", now - Duration::minutes(1));
        let new = info("new", now + Duration::hours(2));
        let mut retitled = info("retitled", now + Duration::hours(3));
        let gone = info("gone", now + Duration::hours(4));

        let current = vec![keep.clone(), retitled.clone(), gone.clone()];
        retitled.title = "Renamed".into();
        let desired = vec![keep, past, new.clone(), retitled.clone()];

        let plan = plan_reconcile(&desired, &current, now);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.skipped_past, 1);
        let mut cancel = plan.cancel.clone();
        cancel.sort();
        assert_eq!(cancel, vec![gone.identifier, retitled.identifier.clone()]);
        let scheduled: Vec<&str> = plan.schedule.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(scheduled.len(), 2);
        assert!(scheduled.contains(&new.identifier.as_str()));
        assert!(scheduled.contains(&retitled.identifier.as_str()));
    }

    #[tokio::test]
    async fn repeated_sync_is_idempotent() {
        let now = Utc::now();
        let source = Arc::new(MockSource::with(vec![
            server_notification("a", now + Duration::hours(1)),
            server_notification("b", now + Duration::hours(2)),
        ]));
        let scheduler = Arc::new(MemoryScheduler::default());
        let engine = engine(source.clone(), scheduler.clone());

        let first = completed(engine.sync(SyncTrigger::Manual).await.unwrap());
        assert_eq!(first.scheduled, 2);

        let second = completed(engine.sync(SyncTrigger::Periodic).await.unwrap());
        assert_eq!(second.scheduled, 0);
        assert_eq!(second.cancelled, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(scheduler.schedule_calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.cancel_calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_ids().len(), 2);
    }

    #[tokio::test]
    async fn moved_reminder_is_rescheduled() {
        let now = Utc::now();
        let source = Arc::new(MockSource::with(vec![server_notification(
            "a",
            now + Duration::hours(1),
        )]));
        let scheduler = Arc::new(MemoryScheduler::default());
        let engine = engine(source.clone(), scheduler.clone());
        engine.sync(SyncTrigger::Startup).await.unwrap();

        let moved = server_notification("a", now + Duration::hours(5));
        source.set(vec![moved.clone()]);
        let report = completed(engine.sync(SyncTrigger::Manual).await.unwrap());
        assert_eq!((report.cancelled, report.scheduled), (1, 1));
        assert_eq!(scheduler.pending_ids(), vec![moved.identifier()]);
    }

    struct GatedSource {
        entered: Notify,
        release: Notify,
        inner: MockSource,
    }

    #[async_trait]
    impl NotificationSource for GatedSource {
        async fn fetch_notifications(&self, within_days: u32) -> Result<Vec<ServerNotification>> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.fetch_notifications(within_days).await
        }
    }

    #[tokio::test]
    async fn concurrent_syncs_collapse() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
            inner: MockSource::with(vec![server_notification(
                "a",
                Utc::now() + Duration::hours(1),
            )]),
        });
        let engine = Arc::new(engine(source.clone(), Arc::new(MemoryScheduler::default())));

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync(SyncTrigger::Manual).await })
        };
        source.entered.notified().await;
        assert!(engine.is_syncing());
        assert_eq!(engine.status(), SyncStatus::Syncing);

        let others = join_all((0..3).map(|_| engine.sync(SyncTrigger::Periodic))).await;
        for outcome in others {
            assert_eq!(outcome.unwrap(), SyncOutcome::Skipped);
        }

        source.release.notify_one();
        let report = completed(running.await.unwrap().unwrap());
        assert_eq!(report.scheduled, 1);
        assert_eq!(source.inner.calls(), 1);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_cleared() {
        let source = Arc::new(MockSource::default());
        source.set_failing(true);
        let engine = engine(source.clone(), Arc::new(MemoryScheduler::default()));

        let err = engine.sync(SyncTrigger::Periodic).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
        assert!(matches!(engine.status(), SyncStatus::Error(_)));
        assert!(engine.state().snapshot().last_error.is_some());
        assert!(!engine.is_syncing());

        source.set_failing(false);
        completed(engine.sync(SyncTrigger::Manual).await.unwrap());
        assert!(matches!(engine.status(), SyncStatus::LastSynced(_)));
        let state = engine.state().snapshot();
        assert_eq!(state.last_error, None);
        assert!(state.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn stale_presented_are_dismissed() {
        let now = Utc::now();
        let still_valid = server_notification("valid", now - Duration::minutes(5));
        let source = Arc::new(MockSource::with(vec![still_valid.clone()]));
        let scheduler = Arc::new(MemoryScheduler::default());
        scheduler.mark_presented(&still_valid.identifier());
        scheduler.mark_presented("stale|scheduled|0");
        let engine = engine(source, scheduler.clone());

        let report = completed(engine.sync(SyncTrigger::Foreground).await.unwrap());
        assert_eq!(report.dismissed, 1);
        assert_eq!(report.skipped_past, 1);
        assert_eq!(
            *scheduler.dismissed.lock().unwrap(),
            vec!["stale|scheduled|0".to_string()]
        );
        assert_eq!(
            scheduler.presented().await.unwrap(),
            vec![still_valid.identifier()]
        );
    }

    #[tokio::test]
    async fn item_errors_do_not_fail_the_sync() {
        let now = Utc::now();
        let ok = server_notification("ok", now + Duration::hours(1));
        let bad = server_notification("bad", now + Duration::hours(2));
        let source = Arc::new(MockSource::with(vec![ok.clone(), bad.clone()]));
        let scheduler = Arc::new(MemoryScheduler::default());

        // Armed earlier, no longer on the server
        let gone = info("gone", now + Duration::hours(3));
        scheduler.schedule(gone.clone()).await.unwrap();
        scheduler.break_on(&gone.identifier);
        scheduler.break_on(&bad.identifier());
        scheduler.mark_presented("stale|scheduled|0");
        scheduler.break_on("stale|scheduled|0");
        let engine = engine(source, scheduler.clone());

        let report = completed(engine.sync(SyncTrigger::Manual).await.unwrap());
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.cancelled, 0);
        assert_eq!(report.dismissed, 0);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.starts_with("cancel gone")));
        assert!(report.errors.iter().any(|e| e.starts_with("schedule bad")));

        assert!(matches!(engine.status(), SyncStatus::LastSynced(_)));
        assert_eq!(engine.state().snapshot().last_error, None);
        assert!(scheduler.pending_ids().contains(&ok.identifier()));
    }

    #[tokio::test]
    async fn subscribers_see_status_changes() {
        let source = Arc::new(MockSource::default());
        let engine = engine(source, Arc::new(MemoryScheduler::default()));
        let mut status = engine.subscribe();
        assert_eq!(*status.borrow_and_update(), SyncStatus::Idle);

        engine.sync(SyncTrigger::Manual).await.unwrap();
        assert!(status.has_changed().unwrap());
        assert!(matches!(*status.borrow_and_update(), SyncStatus::LastSynced(_)));
    }

    #[tokio::test]
    async fn horizon_is_validated_and_used() {
        let source = Arc::new(MockSource::default());
        let engine = engine(source.clone(), Arc::new(MemoryScheduler::default()));
        assert_eq!(engine.horizon().days(), 7);

        assert!(engine.set_horizon(0.0).is_err());
        assert!(engine.set_horizon(91.0).is_err());
        assert!(engine.set_horizon(f64::NAN).is_err());
        assert_eq!(engine.horizon().days(), 7);

        engine.set_horizon(30.0).unwrap();
        engine.sync(SyncTrigger::Manual).await.unwrap();
        assert_eq!(source.last_within(), 30);
    }

    #[test]
    fn state_store_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sync.json");
        let store = SyncStateStore::load(&path);
        store.set_horizon(21.0).unwrap();
        store.record_failure("timeout");

        let reloaded = SyncStateStore::load(&path);
        let state = reloaded.snapshot();
        assert_eq!(state.horizon_days.days(), 21);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn failed_horizon_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = SyncStateStore::load(&blocker.join("sync.json"));

        assert!(matches!(store.set_horizon(30.0), Err(Error::Io(_))));
        assert_eq!(store.horizon().days(), 7);

        store.record_success(Utc::now(), 0);
        assert_eq!(store.horizon().days(), 7);
    }

    #[test]
    fn snapshot_survives_poisoned_lock() {
        let store = Arc::new(SyncStateStore::in_memory());
        store.set_horizon(40.0).unwrap();
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(store.state.is_poisoned());
        assert_eq!(store.horizon().days(), 40);
    }

    #[test]
    fn state_store_tolerates_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(SyncStateStore::load(&path).snapshot(), SyncState::default());

        std::fs::write(&path, r#"{"horizonDays": 400}"#).unwrap();
        assert_eq!(SyncStateStore::load(&path).horizon().days(), 90);
    }
}
