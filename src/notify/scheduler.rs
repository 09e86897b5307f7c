//! Local scheduling of reminder notifications.
//!
//! `TimerScheduler` arms one tokio timer per identifier. When a timer fires
//! the optional [`FireGate`] is consulted before the [`Presenter`] shows the
//! notification. The pending set is written to disk on every change so a
//! restarted process can re-arm it with [`TimerScheduler::restore`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::notification::ScheduledNotificationInfo;
use crate::error::{Error, Result};

/// How many presented identifiers are remembered for later dismissal.
const PRESENTED_HISTORY: usize = 200;

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    /// Arm a notification; an existing entry with the same identifier is replaced.
    async fn schedule(&self, info: ScheduledNotificationInfo) -> Result<()>;
    /// Disarm a pending notification. Unknown identifiers are ignored.
    async fn cancel(&self, identifier: &str) -> Result<()>;
    async fn scheduled(&self) -> Result<Vec<ScheduledNotificationInfo>>;
    /// Identifiers of notifications already shown and not yet dismissed.
    async fn presented(&self) -> Result<Vec<String>>;
    async fn dismiss(&self, identifier: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Present,
    Suppress,
}

/// Consulted right before a notification is shown.
#[async_trait]
pub trait FireGate: Send + Sync {
    async fn check(&self, info: &ScheduledNotificationInfo) -> Verdict;
}

/// Shows and removes notifications on whatever surface the host provides.
pub trait Presenter: Send + Sync {
    fn present(&self, info: &ScheduledNotificationInfo) -> Result<()>;
    fn dismiss(&self, identifier: &str) -> Result<()>;
}

/// Writes fired reminders to the log (and thus the journal).
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn present(&self, info: &ScheduledNotificationInfo) -> Result<()> {
        log::info!("Reminder: {} ({})", info.title, info.body);
        Ok(())
    }

    fn dismiss(&self, identifier: &str) -> Result<()> {
        log::info!("Reminder withdrawn: {}", identifier);
        Ok(())
    }
}

struct Pending {
    info: ScheduledNotificationInfo,
    task: JoinHandle<()>,
    /// Matches the epoch captured by the timer task; a replaced entry's
    /// late-firing task sees a different epoch and does nothing.
    epoch: u64,
}

#[derive(Default)]
struct TimerState {
    pending: HashMap<String, Pending>,
    presented: Vec<String>,
    next_epoch: u64,
}

struct Shared {
    state: Mutex<TimerState>,
    presenter: Arc<dyn Presenter>,
    gate: RwLock<Option<Arc<dyn FireGate>>>,
    store_path: Option<PathBuf>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, TimerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Scheduler("Timer state lock poisoned".to_string()))
    }

    fn persist(&self, state: &TimerState) {
        let Some(path) = &self.store_path else {
            return;
        };
        let mut infos: Vec<&ScheduledNotificationInfo> =
            state.pending.values().map(|p| &p.info).collect();
        infos.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        match serde_json::to_string_pretty(&infos) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to save scheduled notifications: {}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize scheduled notifications: {}", e),
        }
    }

    async fn fire(self: Arc<Self>, identifier: String, epoch: u64) {
        let info = {
            let Ok(mut state) = self.lock() else {
                return;
            };
            match state.pending.get(&identifier) {
                Some(p) if p.epoch == epoch => {}
                _ => return,
            }
            let Some(pending) = state.pending.remove(&identifier) else {
                return;
            };
            self.persist(&state);
            pending.info
        };

        let gate = self.gate.read().ok().and_then(|g| (*g).clone());
        if let Some(gate) = gate {
            if gate.check(&info).await == Verdict::Suppress {
                log::info!("Suppressed stale reminder: {}", info.identifier);
                return;
            }
        }

        if let Err(e) = self.presenter.present(&info) {
            log::warn!("Failed to present {}: {}", info.identifier, e);
            return;
        }

        if let Ok(mut state) = self.lock() {
            state.presented.retain(|id| id != &info.identifier);
            state.presented.push(info.identifier);
            let overflow = state.presented.len().saturating_sub(PRESENTED_HISTORY);
            state.presented.drain(..overflow);
        }
    }
}

pub struct TimerScheduler {
    shared: Arc<Shared>,
}

impl TimerScheduler {
    pub fn new(presenter: Arc<dyn Presenter>) -> Self {
        Self::build(presenter, None)
    }

    /// A scheduler whose pending set survives restarts.
    pub fn persistent(presenter: Arc<dyn Presenter>, path: impl Into<PathBuf>) -> Self {
        Self::build(presenter, Some(path.into()))
    }

    fn build(presenter: Arc<dyn Presenter>, store_path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::default()),
                presenter,
                gate: RwLock::new(None),
                store_path,
            }),
        }
    }

    pub fn set_gate(&self, gate: Arc<dyn FireGate>) {
        if let Ok(mut slot) = self.shared.gate.write() {
            *slot = Some(gate);
        }
    }

    /// Re-arm entries saved by a previous run. Past-due entries are dropped.
    pub async fn restore(&self) -> Result<usize> {
        let Some(path) = self.shared.store_path.clone() else {
            return Ok(0);
        };
        let saved = load_saved(&path)?;
        let now = Utc::now();
        let mut restored = 0;
        for info in saved {
            if info.scheduled_time <= now {
                log::debug!("Dropping past-due reminder {}", info.identifier);
                continue;
            }
            self.schedule(info).await?;
            restored += 1;
        }
        if restored == 0 {
            // Rewrite so dropped entries do not linger on disk
            let state = self.shared.lock()?;
            self.shared.persist(&state);
        }
        log::info!("Restored {} scheduled reminders", restored);
        Ok(restored)
    }
}

/// Read a pending set written by a persistent scheduler.
pub fn load_saved(path: &Path) -> Result<Vec<ScheduledNotificationInfo>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        if let Ok(state) = self.shared.state.lock() {
            for pending in state.pending.values() {
                pending.task.abort();
            }
        }
    }
}

#[async_trait]
impl NotificationScheduler for TimerScheduler {
    async fn schedule(&self, info: ScheduledNotificationInfo) -> Result<()> {
        let delay = (info.scheduled_time - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut state = self.shared.lock()?;
        state.next_epoch = state.next_epoch.wrapping_add(1);
        let epoch = state.next_epoch;

        let shared = Arc::clone(&self.shared);
        let identifier = info.identifier.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire(identifier, epoch).await;
        });

        log::debug!("Scheduled {} in {}s", info.identifier, delay.as_secs());
        if let Some(previous) = state.pending.insert(
            info.identifier.clone(),
            Pending { info, task, epoch },
        ) {
            previous.task.abort();
        }
        self.shared.persist(&state);
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<()> {
        let mut state = self.shared.lock()?;
        if let Some(pending) = state.pending.remove(identifier) {
            pending.task.abort();
            log::debug!("Cancelled {}", identifier);
            self.shared.persist(&state);
        }
        Ok(())
    }

    async fn scheduled(&self) -> Result<Vec<ScheduledNotificationInfo>> {
        let state = self.shared.lock()?;
        let mut infos: Vec<ScheduledNotificationInfo> =
            state.pending.values().map(|p| p.info.clone()).collect();
        infos.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time));
        Ok(infos)
    }

    async fn presented(&self) -> Result<Vec<String>> {
        Ok(self.shared.lock()?.presented.clone())
    }

    async fn dismiss(&self, identifier: &str) -> Result<()> {
        {
            let mut state = self.shared.lock()?;
            state.presented.retain(|id| id != identifier);
        }
        self.shared.presenter.dismiss(identifier)
    }
}
