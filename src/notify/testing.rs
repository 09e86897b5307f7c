//! Fakes shared by the notify tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::scheduler::{NotificationScheduler, Presenter};
use super::sync::NotificationSource;
use crate::core::notification::{NotificationKind, ScheduledNotificationInfo, ServerNotification};
use crate::error::{Error, Result};

pub fn server_notification(id: &str, notify_at: DateTime<Utc>) -> ServerNotification {
    ServerNotification {
        id: Some(id.to_string()),
        title: format!("Task {}", id),
        file: None,
        pos: None,
        notify_at,
        event_time: None,
        minutes_before: None,
        notify_type: NotificationKind::Scheduled,
        todo_state: None,
    }
}

#[derive(Default)]
pub struct MockSource {
    notifications: Mutex<Vec<ServerNotification>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    last_within: AtomicUsize,
}

impl MockSource {
    pub fn with(notifications: Vec<ServerNotification>) -> Self {
        let source = Self::default();
        source.set(notifications);
        source
    }

    pub fn set(&self, notifications: Vec<ServerNotification>) {
        *self.notifications.lock().unwrap() = notifications;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_within(&self) -> usize {
        self.last_within.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSource for MockSource {
    async fn fetch_notifications(&self, within_days: u32) -> Result<Vec<ServerNotification>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_within.store(within_days as usize, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.notifications.lock().unwrap().clone())
    }
}

/// Scheduler that only records what it was asked to do.
#[derive(Default)]
pub struct MemoryScheduler {
    pending: Mutex<BTreeMap<String, ScheduledNotificationInfo>>,
    presented: Mutex<Vec<String>>,
    pub schedule_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub dismissed: Mutex<Vec<String>>,
    broken: Mutex<HashSet<String>>,
}

impl MemoryScheduler {
    /// Make every operation on `identifier` fail.
    pub fn break_on(&self, identifier: &str) {
        self.broken.lock().unwrap().insert(identifier.to_string());
    }

    fn check(&self, identifier: &str) -> Result<()> {
        if self.broken.lock().unwrap().contains(identifier) {
            return Err(Error::Scheduler(format!("{} rejected", identifier)));
        }
        Ok(())
    }

    pub fn mark_presented(&self, identifier: &str) {
        self.presented.lock().unwrap().push(identifier.to_string());
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl NotificationScheduler for MemoryScheduler {
    async fn schedule(&self, info: ScheduledNotificationInfo) -> Result<()> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&info.identifier)?;
        self.pending
            .lock()
            .unwrap()
            .insert(info.identifier.clone(), info);
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.check(identifier)?;
        self.pending.lock().unwrap().remove(identifier);
        Ok(())
    }

    async fn scheduled(&self) -> Result<Vec<ScheduledNotificationInfo>> {
        Ok(self.pending.lock().unwrap().values().cloned().collect())
    }

    async fn presented(&self) -> Result<Vec<String>> {
        Ok(self.presented.lock().unwrap().clone())
    }

    async fn dismiss(&self, identifier: &str) -> Result<()> {
        self.check(identifier)?;
        self.presented.lock().unwrap().retain(|id| id != identifier);
        self.dismissed.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<String>>,
    dismissed: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> Vec<String> {
        self.dismissed.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, info: &ScheduledNotificationInfo) -> Result<()> {
        self.shown.lock().unwrap().push(info.identifier.clone());
        Ok(())
    }

    fn dismiss(&self, identifier: &str) -> Result<()> {
        self.dismissed.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}
